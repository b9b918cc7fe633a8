use std::error::Error;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_merge_sort::generate::generate_file;
use ext_merge_sort::line::DEFAULT_RW_BUF_SIZE;
use ext_merge_sort::sort::DEFAULT_WORK_DIR;
use ext_merge_sort::verify::{verify_file, Verdict};
use ext_merge_sort::{LogProgress, MergeSorterBuilder};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let result = match arg_parser.subcommand() {
        Some(("sort", args)) => run_sort(args),
        Some(("generate", args)) => run_generate(args),
        Some(("check", args)) => run_check(args),
        _ => Err("unknown command".into()),
    };

    if let Err(err) = result {
        log::error!("{}", err);
        process::exit(1);
    }
}

fn run_sort(args: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let input = Path::new(args.value_of("input").expect("value has a default"));
    let output = Path::new(args.value_of("output").expect("value has a default"));
    let work_dir = Path::new(args.value_of("work_dir").expect("value has a default"));
    let chunk_lines: usize = args.value_of_t_or_exit("chunk_lines");
    let sort_workers: usize = args.value_of_t_or_exit("sort_workers");
    let merge_workers: usize = args.value_of_t_or_exit("merge_workers");
    let buffer = args
        .value_of("buffer")
        .expect("value has a default")
        .parse::<ByteSize>()
        .expect("value is pre-validated");
    let threads: Option<usize> = args
        .is_present("threads")
        .then(|| args.value_of_t_or_exit("threads"));

    let input_bytes = fs::metadata(input).map(|meta| meta.len()).unwrap_or(0);

    let mut sorter_builder = MergeSorterBuilder::new()
        .with_work_dir(work_dir)
        .with_chunk_lines(chunk_lines)
        .with_sort_workers(sort_workers)
        .with_merge_workers(merge_workers)
        .with_rw_buf_size(buffer.as_u64() as usize)
        .with_progress(Arc::new(LogProgress::new(input_bytes)));
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    let sorter = sorter_builder.build()?;
    let report = sorter.sort(input, output)?;

    println!(
        "finished in {:.2?} ({} chunks, {} merge rounds)",
        report.elapsed, report.chunks, report.rounds
    );

    return Ok(());
}

fn run_generate(args: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let output = Path::new(args.value_of("output").expect("value has a default"));
    let count: u64 = args.value_of_t_or_exit("count");

    let started = Instant::now();
    generate_file(output, count, DEFAULT_RW_BUF_SIZE, &mut rand::thread_rng())?;

    println!("generated {} numbers in {:.2?}", count, started.elapsed());

    return Ok(());
}

fn run_check(args: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let input = Path::new(args.value_of("input").expect("value has a default"));

    match verify_file(input, DEFAULT_RW_BUF_SIZE)? {
        Verdict::Sorted { count } => {
            println!("{} numbers, properly sorted", count);
            Ok(())
        }
        Verdict::Unsorted { line, previous, next } => {
            Err(format!("not properly sorted: {} came before {} (line {})", previous, next, line).into())
        }
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn positive_number(value: &str) -> Result<(), String> {
    match value.parse::<usize>() {
        Ok(0) => Err("value must be positive".to_string()),
        Ok(_) => Ok(()),
        Err(err) => Err(format!("number format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-merge-sort")
        .about("external merge sort of line-delimited integers")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .subcommand(
            clap::App::new("sort")
                .about("sorts a file of integers")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted")
                        .takes_value(true)
                        .default_value("nums.txt"),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file")
                        .takes_value(true)
                        .default_value("sorted.txt"),
                )
                .arg(
                    clap::Arg::new("work_dir")
                        .short('d')
                        .long("work-dir")
                        .help("directory to be used to store chunk files, wiped on start")
                        .takes_value(true)
                        .default_value(DEFAULT_WORK_DIR),
                )
                .arg(
                    clap::Arg::new("chunk_lines")
                        .short('c')
                        .long("chunk-lines")
                        .help("number of lines per chunk")
                        .takes_value(true)
                        .default_value("1000000")
                        .validator(positive_number),
                )
                .arg(
                    clap::Arg::new("sort_workers")
                        .long("sort-workers")
                        .help("number of chunks sorted in parallel")
                        .takes_value(true)
                        .default_value("8")
                        .validator(positive_number),
                )
                .arg(
                    clap::Arg::new("merge_workers")
                        .long("merge-workers")
                        .help("number of merges running in parallel")
                        .takes_value(true)
                        .default_value("20")
                        .validator(positive_number),
                )
                .arg(
                    clap::Arg::new("buffer")
                        .short('b')
                        .long("buffer")
                        .help("file read/write buffer size")
                        .takes_value(true)
                        .default_value("1MiB")
                        .validator(|v| match v.parse::<ByteSize>() {
                            Ok(_) => Ok(()),
                            Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                        }),
                )
                .arg(
                    clap::Arg::new("threads")
                        .short('t')
                        .long("threads")
                        .help("number of threads to use for in-memory chunk sorting")
                        .takes_value(true)
                        .validator(positive_number),
                ),
        )
        .subcommand(
            clap::App::new("generate")
                .about("generates a file of random integers")
                .arg(
                    clap::Arg::new("count")
                        .index(1)
                        .help("number of integers to generate")
                        .takes_value(true)
                        .default_value("100000000")
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("number argument malformed".to_string()),
                        }),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("file to be generated")
                        .takes_value(true)
                        .default_value("nums.txt"),
                ),
        )
        .subcommand(
            clap::App::new("check")
                .about("checks that a file of integers is sorted")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be checked")
                        .takes_value(true)
                        .default_value("sorted.txt"),
                ),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
