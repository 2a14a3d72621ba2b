use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use line_ext_sort::{
    BytewiseComparator, CancellationToken, ExternalSorterBuilder, LineComparator, NumberedLineComparator, Reversed,
    SortOutcome,
};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let order: Order = arg_parser.value_of_t_or_exit("sort");
    let mode: Mode = arg_parser.value_of_t_or_exit("mode");
    let tmp_dir = arg_parser.value_of("tmp_dir").expect("value has default");
    let chunk_size = arg_parser.value_of("chunk_size").expect("value has default");
    let fan_in: usize = arg_parser.value_of_t_or_exit("fan_in");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let input = arg_parser.value_of("input").expect("value has default");
    let input_stream = match fs::File::open(input) {
        Ok(file) => file,
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let output = arg_parser.value_of("output").expect("value has default");
    let mut output_stream = match fs::File::create(output) {
        Ok(file) => io::BufWriter::new(file),
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let chunk_size = match parse_chunk_size(chunk_size) {
        Ok(chunk_size) => chunk_size,
        Err(err) => {
            log::error!("{}", err);
            process::exit(1);
        }
    };

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_tmp_dir(path::Path::new(tmp_dir))
        .with_chunk_size(chunk_size)
        .with_fan_in(fan_in)
        .with_split_progress(|progress| log::info!("split progress: {:.2}%", progress * 100.0))
        .with_sort_progress(|progress| log::info!("sort progress: {:.2}%", progress * 100.0))
        .with_merge_progress(|progress| log::info!("merge progress: {:.2}%", progress * 100.0));
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    let outcome = match (mode, order) {
        (Mode::Numbered, Order::Asc) => run(sorter_builder, input_stream, &mut output_stream),
        (Mode::Numbered, Order::Desc) => run(
            sorter_builder.with_comparator(Reversed(NumberedLineComparator)),
            input_stream,
            &mut output_stream,
        ),
        (Mode::Bytes, Order::Asc) => run(
            sorter_builder.with_comparator(BytewiseComparator),
            input_stream,
            &mut output_stream,
        ),
        (Mode::Bytes, Order::Desc) => run(
            sorter_builder.with_comparator(Reversed(BytewiseComparator)),
            input_stream,
            &mut output_stream,
        ),
    };

    if outcome == SortOutcome::Cancelled {
        log::warn!("sorting cancelled, output is incomplete");
        process::exit(2);
    }

    if let Err(err) = output_stream.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }

    log::info!("done! sorted data saved to {}", output);
}

fn parse_chunk_size(value: &str) -> Result<usize, String> {
    let size = value
        .parse::<ByteSize>()
        .map_err(|err| format!("chunk size format incorrect: {}", err))?;
    usize::try_from(size.as_u64()).map_err(|_| format!("chunk size {} does not fit into the address space", size))
}

fn run<C: LineComparator>(
    sorter_builder: ExternalSorterBuilder<C>,
    input_stream: fs::File,
    output_stream: &mut impl Write,
) -> SortOutcome {
    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    match sorter.sort(input_stream, output_stream, &CancellationToken::new()) {
        Ok(outcome) => outcome,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
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

#[derive(Copy, Clone, clap::ArgEnum)]
enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Order::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Order as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Mode {
    Numbered,
    Bytes,
}

impl Mode {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Mode::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Mode as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("line-ext-sort")
        .about("external merge sort for text files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .takes_value(true)
                .default_value("input.txt"),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .takes_value(true)
                .default_value("output.txt"),
        )
        .arg(
            clap::Arg::new("sort")
                .short('s')
                .long("sort")
                .help("sorting order")
                .takes_value(true)
                .default_value("asc")
                .possible_values(Order::possible_values()),
        )
        .arg(
            clap::Arg::new("mode")
                .short('m')
                .long("mode")
                .help("line ordering: `numbered` for \"<number>. <text>\" lines, `bytes` for raw byte order")
                .takes_value(true)
                .default_value("numbered")
                .possible_values(Mode::possible_values()),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for in-memory chunk sorting (default 1)")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true)
                .default_value("temp"),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("chunk size")
                .takes_value(true)
                .default_value("2MiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("fan_in")
                .short('f')
                .long("fan-in")
                .help("maximum number of files merged at once")
                .takes_value(true)
                .default_value("10"),
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
