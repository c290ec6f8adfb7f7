use std::fs::File;
use std::sync::Arc;
use std::thread;

use amrkit::ghost;
use amrkit::image_to_amr::image_to_amr;
use amrkit::index_space::range3d;
use amrkit::message::comm::Communicator;
use amrkit::message::local::ChannelCommunicator;
use amrkit::resample::{Coverage, ResampledOutput, Resampler};
use amrkit::{Centering, Config, GridBlock, TransferMode};
use clap::Parser;
use log::info;
use simple_logger::SimpleLogger;

#[derive(Debug, Parser)]
#[clap(version = "0.1", author = "J. Zrake <jzrake@clemson.edu>")]
struct Opts {
    #[clap(short = 'w', long, default_value = "2")]
    num_workers: usize,

    #[clap(short = 'n', long, default_value = "32")]
    image_cells: i64,

    #[clap(short = 'l', long, default_value = "3")]
    num_levels: usize,

    #[clap(short = 'b', long, default_value = "16")]
    max_blocks: usize,

    #[clap(short = 'r', long, default_value = "2")]
    level_of_resolution: u32,

    #[clap(short = 's', long, default_value = "4")]
    subdivisions: usize,

    #[clap(short = 'g', long, default_value = "1")]
    ghost_depth: usize,

    #[clap(long)]
    nodes: bool,

    #[clap(long)]
    demand_driven: bool,

    #[clap(short = 'o', long, default_value = "resampled.cbor")]
    output: String,

    #[clap(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();
    SimpleLogger::new().with_level(opts.log_level).init()?;
    info!("{:?}", opts);

    let n = opts.image_cells;
    let h = 1.0 / n as f64;
    let image = GridBlock::new(0, [0.0; 3], [h; 3], range3d(0..n, 0..n, 0..n))
        .with_field_function("density", Centering::Cell, 1, |[i, j, k], s| {
            let r2 = [i, j, k].iter().map(|&x| ((x as f64 + 0.5) * h - 0.5).powi(2)).sum::<f64>();
            s[0] = 1.0 + f64::exp(-50.0 * r2)
        });

    let hierarchy = Arc::new(image_to_amr(&image, opts.num_levels, 2, opts.max_blocks)?);

    let config = Config {
        level_of_resolution: opts.level_of_resolution,
        ghost_depth: opts.ghost_depth,
        number_of_subdivisions: opts.subdivisions,
        transfer_mode: if opts.nodes { TransferMode::Nodes } else { TransferMode::CellCenters },
        region_min: [0.25; 3],
        region_max: [0.75; 3],
        demand_driven: opts.demand_driven,
    };
    let resampler = Arc::new(Resampler::new(config.clone())?);

    let handles: Vec<_> = ChannelCommunicator::group(opts.num_workers)
        .into_iter()
        .map(|comm| {
            let hierarchy = hierarchy.clone();
            let resampler = resampler.clone();
            let depth = config.ghost_depth;

            thread::spawn(move || -> amrkit::Result<ResampledOutput> {
                let local = resampler.load(&hierarchy, comm.rank(), comm.size())?;
                let ghosted = ghost::generate(&local, depth, &comm)?;
                resampler.resample(&ghosted, &comm)
            })
        })
        .collect();

    let mut output = ResampledOutput::default();

    for handle in handles {
        let part = handle.join().map_err(|_| "worker thread panicked")??;
        output.coverage = output.coverage + part.coverage;
        output.grids.extend(part.grids);
    }

    let Coverage { targets, found } = output.coverage;
    info!("{} of {} target entries have a donor", found, targets);

    let file = File::create(&opts.output)?;
    ciborium::ser::into_writer(&output, file)?;
    info!("wrote {}", opts.output);
    Ok(())
}
