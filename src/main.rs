use std::{
    error::Error,
    fs, io,
    net::UdpSocket,
    process::{self, ExitCode},
    sync::{atomic::AtomicBool, Arc},
};

use clap::Parser;
use spec_slurper::{
    args::{convert_filter, Args, CaptureArgs, Command, EmitArgs, InspectArgs},
    capture::UdpIngest,
    controller::{request_stop, AcquisitionController},
    metadata::{MetadataSink, ReportLineSink, SpecFileRecord},
    monitoring::verify,
    packet::{Geometry, PacketCodec},
    sim::{self, SyntheticSource},
    writer::SpecFile,
};
use tracing::{error, info, warn};

fn capture(args: CaptureArgs) -> Result<(), Box<dyn Error>> {
    let config = args.into_config()?;
    // Binding failure ends the run before anything is captured
    let ingest = UdpIngest::bind(config.bind, config.geometry.frame_size())?;

    // Ctrl-C finishes the round in flight and then stops, a second one exits at once
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    let handler = move || {
        if request_stop(&handler_stop) {
            warn!("Interrupted again, exiting now");
            process::exit(130);
        }
        warn!("Interrupted, stopping after this round (Ctrl-C again to exit now)");
    };
    if let Err(e) = ctrlc::set_handler(handler) {
        warn!(error = %e, "Unable to install interrupt handler");
    }

    let sink = ReportLineSink::new(io::stdout());
    let mut controller = AcquisitionController::new(&config, ingest, sink).with_stop_flag(stop);
    let summary = controller.run()?;
    info!(
        kept = summary.kept.len(),
        discarded = summary.discarded,
        rounds = summary.rounds,
        "Acquisition complete"
    );
    Ok(())
}

fn inspect(args: InspectArgs) -> Result<(), Box<dyn Error>> {
    let codec = PacketCodec::new(Geometry::from_channels(args.channels)?);
    let mut sink = ReportLineSink::new(io::stdout());
    for (index, path) in args.files.into_iter().enumerate() {
        let outcome = verify(&path, &codec, true);
        let file = SpecFile {
            index,
            volume: 0,
            frames: outcome.report().map_or(0, |r| r.frames),
            bytes: fs::metadata(&path).map_or(0, |m| m.len()),
            path,
        };
        sink.record(&SpecFileRecord::new(&file, outcome, false))?;
    }
    Ok(())
}

fn emit(args: EmitArgs) -> Result<(), Box<dyn Error>> {
    let codec = PacketCodec::new(Geometry::from_channels(args.channels)?);
    let mut source = SyntheticSource::new(codec);
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    sim::emit(&mut source, &socket, args.target, args.frames)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    // Logs go to stderr, stdout carries the per-file report lines
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .with_writer(io::stderr)
        .init();

    let result = match args.command {
        Command::Capture(capture_args) => capture(capture_args),
        Command::Inspect(inspect_args) => inspect(inspect_args),
        Command::Emit(emit_args) => emit(emit_args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
