use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_apptuit::ApptuitExporterBuilder;
use rand::Rng as _;

fn main() {
    tracing_subscriber::fmt::init();

    // Reads the token from `APPTUIT_API_TOKEN`.
    let handle = ApptuitExporterBuilder::default()
        .with_prefix("example.")
        .with_reporting_interval(Duration::from_secs(5))
        .with_error_handler(|e| eprintln!("reporting failed: {e}"))
        .install()
        .expect("failed to install Apptuit recorder");

    let server_loops = counter!("tcp_server_loops", "system" => "foo");
    let server_loops_delta_secs = histogram!("tcp_server_loop_delta_secs", "system" => "foo");

    let mut rng = rand::rng();

    // Pretend to do some work for a minute.
    for _ in 0..600 {
        server_loops.increment(1);
        server_loops_delta_secs.record(rng.random_range(0.0..1.0));
        gauge!("lucky_iterations").set(rng.random_range(0.0..100.0));

        std::thread::sleep(Duration::from_millis(100));
    }

    if let Err(e) = handle.reporter().report_now(None) {
        eprintln!("final report failed: {e}");
    }
    handle.stop();
}
