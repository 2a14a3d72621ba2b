use std::fs;
use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;

use line_ext_sort::{CancellationToken, ExternalSorterBuilder, SortOutcome};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let input_reader = fs::File::open("input.txt").unwrap();
    let mut output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());

    let sorter = ExternalSorterBuilder::new()
        .with_tmp_dir(path::Path::new("./temp"))
        .with_chunk_size(16 * 1024 * 1024)
        .with_fan_in(16)
        .with_split_progress(|progress| log::info!("split progress: {:.2}%", progress * 100.0))
        .with_sort_progress(|progress| log::info!("sort progress: {:.2}%", progress * 100.0))
        .with_merge_progress(|progress| log::info!("merge progress: {:.2}%", progress * 100.0))
        .build()
        .unwrap();

    match sorter.sort(input_reader, &mut output_writer, &CancellationToken::new()).unwrap() {
        SortOutcome::Completed(summary) => log::info!(
            "sorted {} chunks in {} merge passes",
            summary.chunks,
            summary.merge_passes
        ),
        SortOutcome::Cancelled => log::warn!("sorting cancelled"),
    }
    output_writer.flush().unwrap();
}
