// wavpack-decode
// Copyright (c) 2024 The wavpack-decode Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::{Arg, ArgAction, ArgMatches};
use log::{error, info, warn, LevelFilter};
use symphonia_core::io::MediaSourceStream;

use wavpack_decode::errors::Result;
use wavpack_decode::{Mode, WavpackContext};

mod wav;

use wav::{WavSpec, WavWriter};

/// Number of samples requested from the decoder per call.
const SAMPLES_PER_CALL: u32 = 4096;

fn main() {
    let args = clap::Command::new("wvunpack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Decode a WavPack file to RIFF/WAVE")
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("OUTPUT")
                .help("The output file path, defaults to the input path with a .wav extension"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Log every recovered error and block")
                .conflicts_with("quiet"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .help("Only log errors"),
        )
        .arg(Arg::new("INPUT").help("The input file path").required(true).index(1))
        .get_matches();

    init_logger(&args);

    let code = match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            1
        }
    };

    std::process::exit(code)
}

/// Installs the logger. `RUST_LOG` takes precedence over the verbosity flags.
fn init_logger(args: &ArgMatches) {
    let level = if args.get_flag("verbose") {
        LevelFilter::Debug
    }
    else if args.get_flag("quiet") {
        LevelFilter::Error
    }
    else {
        LevelFilter::Info
    };

    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(level);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.init();
}

fn run(args: &ArgMatches) -> Result<i32> {
    let input = match args.get_one::<String>("INPUT") {
        Some(input) => Path::new(input),
        None => return Ok(2),
    };

    let output = match args.get_one::<String>("output") {
        Some(output) => PathBuf::from(output),
        None => input.with_extension("wav"),
    };

    let mss = MediaSourceStream::new(Box::new(File::open(input)?), Default::default());

    let mut ctx = WavpackContext::open(mss)?;

    let spec = WavSpec {
        channels: ctx.reduced_channels() as u16,
        sample_rate: ctx.sample_rate(),
        bits_per_sample: ctx.bits_per_sample() as u16,
        bytes_per_sample: ctx.bytes_per_sample() as u16,
    };

    if ctx.reduced_channels() != ctx.num_channels() {
        warn!(
            "only the first {} of {} channels are decoded",
            ctx.reduced_channels(),
            ctx.num_channels()
        );
    }

    let mut writer = WavWriter::new(BufWriter::new(File::create(&output)?), spec)?;

    let mut buf = vec![0; SAMPLES_PER_CALL as usize * usize::from(spec.channels)];

    loop {
        let count = ctx.unpack_samples(&mut buf, SAMPLES_PER_CALL) as usize;

        if count == 0 {
            break;
        }

        writer.write_samples(&buf[..count * usize::from(spec.channels)])?;
    }

    let frames = writer.frames();
    writer.finalize()?;

    let mode = ctx.mode();

    info!("input: {}", input.display());
    info!("output: {}", output.display());
    info!(
        "channels={}, rate={}, bits={}, samples={}, crc errors={}, {}",
        spec.channels,
        spec.sample_rate,
        spec.bits_per_sample,
        frames,
        ctx.num_errors(),
        if mode.contains(Mode::HYBRID) {
            "hybrid"
        }
        else if mode.contains(Mode::LOSSLESS) {
            "lossless"
        }
        else {
            "lossy"
        },
    );

    if let Some(err) = ctx.error() {
        error!("decoding stopped early: {}", err);
    }

    match ctx.num_samples() {
        Some(total) if frames < total => {
            error!("only {} of {} samples were decoded", frames, total);
            Ok(1)
        }
        _ => Ok(0),
    }
}
