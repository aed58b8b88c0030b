//! End-to-end capture over a loopback socket with a synthetic digitizer on the other end

use std::{
    net::UdpSocket,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use spec_slurper::{
    capture::UdpIngest,
    config::{AcquisitionConfig, QualityPolicy},
    controller::AcquisitionController,
    metadata::ReportLineSink,
    monitoring::gap_report,
    packet::{Geometry, PacketCodec},
    sim::{self, SyntheticSource},
    writer::FileNameTemplate,
};

#[test]
fn capture_from_loopback() {
    let dirs: Vec<_> = (0..2).map(|_| tempfile::tempdir().unwrap()).collect();
    let config = AcquisitionConfig {
        geometry: Geometry::Narrow,
        frames_per_file: 32,
        target_files: 4,
        volumes: dirs.iter().map(|d| d.path().to_path_buf()).collect(),
        template: FileNameTemplate::new("loopback_", ".spec"),
        bind: "127.0.0.1:0".parse().unwrap(),
        max_retries: 5,
        flush_frames: 300,
        policy: QualityPolicy::default(),
    };
    config.validate().unwrap();
    let codec = config.codec();

    let ingest = UdpIngest::bind(config.bind, codec.frame_size()).unwrap();
    let target = ingest.local_addr().unwrap();

    // Paced sender, well under what the receiver can drain
    let done = Arc::new(AtomicBool::new(false));
    let sender = {
        let done = done.clone();
        thread::spawn(move || {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            let mut source = SyntheticSource::new(PacketCodec::new(Geometry::Narrow));
            while !done.load(Ordering::SeqCst) {
                sim::emit(&mut source, &socket, target, 1).unwrap();
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    let mut controller = AcquisitionController::new(&config, ingest, ReportLineSink::new(Vec::new()));
    let summary = controller.run().unwrap();
    done.store(true, Ordering::SeqCst);
    sender.join().unwrap();

    assert_eq!(summary.kept.len(), 4);
    for record in &summary.kept {
        assert_eq!(record.frames, 32);
        let report = gap_report(&record.path, &codec).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.frames, 32);
    }

    let (_, sink) = controller.into_parts();
    let lines = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(lines.lines().count(), 4 + summary.discarded);
    assert!(lines.lines().all(|l| l.starts_with("file_path:")));
}
