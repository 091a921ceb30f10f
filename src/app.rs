//! Core application runner for `btle-exporter`.
//!
//! This module is decoupled from CLI parsing, signal handling and process
//! exit codes so the scan loop can be tested with an injected scanner.

use crate::advertisement::RawAdvertisement;
use crate::decoder::decode_advertisement;
use crate::emitter::{Emitter, describe_raw, describe_reading};
use crate::envelope::DecodeError;
use crate::metrics::{Metrics, MetricsError};
use crate::names::{Alias, NameDirectory};
use crate::reading::SensorReading;
use crate::scanner::{Backend, ScanError};
use crate::tracker::{DeviceStateTracker, unix_now};
use clap::Parser;
use log::{info, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Command line configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Address the Prometheus metrics responder listens on
    #[arg(
        long,
        env = "BTLE_EXPORTER_METRICS_LISTEN",
        default_value = "0.0.0.0:9978",
        value_name = "ADDR"
    )]
    pub metrics_listen: SocketAddr,

    /// Do not start the metrics responder
    #[arg(long)]
    pub no_metrics: bool,

    /// Bluetooth adapter to scan on
    #[arg(long, default_value = "hci0", value_name = "hciN")]
    pub adapter: String,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Two-column CSV (mac,name) with friendly device names
    #[arg(long, value_name = "PATH")]
    pub names_csv: Option<PathBuf>,

    /// Specify a friendly name for a device, overriding the CSV.
    /// Format: --alias A4:C1:38:D0:2C:EC=Kitchen
    #[arg(long = "alias", value_parser = crate::names::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Write the process id to this file while running
    #[arg(long, value_name = "PATH")]
    pub pidfile: Option<PathBuf>,

    /// Log advertisements nothing could be decoded from
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Log every advertisement, not only the first per device (implies --verbose)
    #[arg(long)]
    pub debug: bool,
}

impl Options {
    pub fn verbose(&self) -> bool {
        self.verbose || self.debug
    }

    /// Friendly names from `--names-csv` with `--alias` entries on top.
    pub fn name_directory(&self) -> NameDirectory {
        let mut names = self
            .names_csv
            .as_deref()
            .map(NameDirectory::load_csv)
            .unwrap_or_default();
        names.extend_aliases(&self.aliases);
        names
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        adapter: &str,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>> + Send + '_>,
    >;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        adapter: &str,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>> + Send + '_>,
    > {
        let adapter = adapter.to_string();
        Box::pin(async move { crate::scanner::start_scan(backend, &adapter).await })
    }
}

/// Per-advertisement processing: decode, publish, track and log.
pub struct Pipeline {
    tracker: DeviceStateTracker,
    names: NameDirectory,
    emitter: Emitter,
    verbose: bool,
    debug: bool,
}

impl Pipeline {
    /// With `debug`, every advertisement gets a detailed log line.
    pub fn new(names: NameDirectory, metrics: Metrics, verbose: bool, debug: bool) -> Self {
        Self {
            tracker: DeviceStateTracker::new(),
            names,
            emitter: Emitter::new(metrics),
            verbose: verbose || debug,
            debug,
        }
    }

    pub fn tracker(&self) -> &DeviceStateTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &Metrics {
        self.emitter.metrics()
    }

    /// Process one advertisement at the current wall-clock time.
    pub fn handle(
        &mut self,
        advertisement: &RawAdvertisement,
    ) -> Result<SensorReading, DecodeError> {
        self.handle_at(advertisement, unix_now())
    }

    /// Process one advertisement observed at `now_unix_seconds`.
    ///
    /// A structural decode failure is logged (subject to the per-device
    /// throttle) and returned; it never affects later advertisements.
    pub fn handle_at(
        &mut self,
        advertisement: &RawAdvertisement,
        now_unix_seconds: u64,
    ) -> Result<SensorReading, DecodeError> {
        let metrics = self.emitter.metrics();
        metrics.advertisement_count.inc();

        let reading = match decode_advertisement(&advertisement.data) {
            Ok(reading) => reading,
            Err(e) => {
                let observation = self.tracker.observe_undecodable_at(
                    advertisement.address,
                    self.debug,
                    now_unix_seconds,
                );
                if observation.detailed_log {
                    warn!("[{}] Cannot parse advertisement data : {e}", advertisement.address);
                }
                return Err(e);
            }
        };

        let name = self.names.lookup(&advertisement.address);
        self.emitter
            .publish(advertisement, name, &reading, now_unix_seconds);

        let supported = reading.model.is_supported();
        let observation =
            self.tracker
                .observe_at(advertisement.address, supported, self.debug, now_unix_seconds);

        if observation.first_counted {
            metrics.device_count.inc();
        }
        if observation.detailed_log
            && let Some(line) = self.detailed_line(advertisement, name, &reading)
        {
            info!("{line}");
        }
        if observation.first_supported {
            metrics.device_supported_count.inc();
        }

        Ok(reading)
    }

    /// The detailed log line for a decoded advertisement, if one is due.
    ///
    /// Supported models get the reading line. Anything else gets the raw
    /// payload line, and only in verbose mode.
    pub fn detailed_line(
        &self,
        advertisement: &RawAdvertisement,
        name: &str,
        reading: &SensorReading,
    ) -> Option<String> {
        if reading.model.is_supported() {
            Some(describe_reading(advertisement, name, reading))
        } else if self.verbose {
            Some(describe_raw(advertisement, reading))
        } else {
            None
        }
    }
}

/// Run the scan loop until the scanner's channel closes.
pub async fn run(
    options: &Options,
    scanner: &dyn Scanner,
    metrics: Metrics,
) -> Result<(), RunError> {
    let mut pipeline = Pipeline::new(
        options.name_directory(),
        metrics,
        options.verbose,
        options.debug,
    );

    let mut advertisements = scanner
        .start_scan(options.backend, &options.adapter)
        .await?;
    info!("scanning on {} ({} backend)", options.adapter, options.backend);

    while let Some(advertisement) = advertisements.recv().await {
        // Decode errors are logged by the pipeline and do not stop the loop.
        let _ = pipeline.handle(&advertisement);
    }

    warn!("advertisement stream closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac_address::MacAddress;
    use crate::reading::SensorModel;
    use crate::test_utils::{FLAGS, TEST_MAC, advertisement, atc, mibeacon, payload};
    use std::sync::Mutex;

    const OTHER_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    #[derive(Debug)]
    struct FakeScanner {
        advertisements: Mutex<Vec<RawAdvertisement>>,
        adapter: Mutex<Option<String>>,
    }

    impl FakeScanner {
        fn new(advertisements: Vec<RawAdvertisement>) -> Self {
            Self {
                advertisements: Mutex::new(advertisements),
                adapter: Mutex::new(None),
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
            adapter: &str,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>>
                    + Send
                    + '_,
            >,
        > {
            *self.adapter.lock().unwrap() = Some(adapter.to_string());
            let advertisements = self.advertisements.lock().unwrap().clone();
            Box::pin(async move {
                let (tx, rx) = mpsc::channel(advertisements.len().max(1));
                tokio::spawn(async move {
                    for a in advertisements {
                        let _ = tx.send(a).await;
                    }
                    // drop tx to close channel
                });
                Ok(rx)
            })
        }
    }

    struct FailingScanner;

    impl Scanner for FailingScanner {
        fn start_scan(
            &self,
            _backend: Backend,
            adapter: &str,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>>
                    + Send
                    + '_,
            >,
        > {
            let adapter = adapter.to_string();
            Box::pin(async move { Err(ScanError::Bluetooth(format!("{adapter} not found"))) })
        }
    }

    fn options() -> Options {
        Options::parse_from(["btle-exporter", "--no-metrics"])
    }

    fn pipeline(debug: bool) -> Pipeline {
        Pipeline::new(NameDirectory::new(), Metrics::new().unwrap(), false, debug)
    }

    fn atc_advertisement(mac: MacAddress) -> RawAdvertisement {
        advertisement(mac, payload(&[&FLAGS, &atc(0x00F4, 0x3C, 0x52, 0x11)]))
    }

    #[test]
    fn test_options_defaults() {
        let options = options();
        assert_eq!(options.metrics_listen, "0.0.0.0:9978".parse().unwrap());
        assert_eq!(options.adapter, "hci0");
        assert_eq!(options.backend, Backend::default());
        assert!(options.names_csv.is_none());
        assert!(!options.verbose());
    }

    #[test]
    fn test_options_debug_implies_verbose() {
        let options = Options::parse_from(["btle-exporter", "--debug"]);
        assert!(options.verbose());
    }

    #[test]
    fn test_options_aliases() {
        let options = Options::parse_from([
            "btle-exporter",
            "--alias",
            "A4:C1:38:D0:2C:EC=Kitchen",
            "--alias",
            "11:22:33:44:55:66=Attic",
        ]);
        let names = options.name_directory();
        assert_eq!(names.lookup(&TEST_MAC), "Kitchen");
        assert_eq!(names.lookup(&OTHER_MAC), "Attic");
    }

    #[test]
    fn test_options_reject_bad_alias() {
        assert!(Options::try_parse_from(["btle-exporter", "--alias", "Kitchen"]).is_err());
    }

    #[test]
    fn test_supported_reading_counts_device_once() {
        let mut pipeline = pipeline(false);
        let adv = atc_advertisement(TEST_MAC);

        let reading = pipeline.handle_at(&adv, 100).unwrap();
        assert_eq!(reading.model, SensorModel::Atc);
        pipeline.handle_at(&adv, 101).unwrap();

        let m = pipeline.metrics();
        assert_eq!(m.advertisement_count.get(), 2);
        assert_eq!(m.advertisement_supported_count.get(), 2);
        assert_eq!(m.device_count.get(), 1);
        assert_eq!(m.device_supported_count.get(), 1);
        assert_eq!(pipeline.tracker().last_seen(&TEST_MAC), Some(101));
    }

    #[test]
    fn test_unknown_advertisement_is_counted_but_not_published() {
        let mut pipeline = pipeline(false);
        let adv = advertisement(OTHER_MAC, FLAGS.to_vec());

        let reading = pipeline.handle_at(&adv, 100).unwrap();
        assert_eq!(reading.model, SensorModel::Unknown);

        let m = pipeline.metrics();
        assert_eq!(m.advertisement_count.get(), 1);
        assert_eq!(m.advertisement_supported_count.get(), 0);
        assert_eq!(m.device_count.get(), 1);
        assert_eq!(m.device_supported_count.get(), 0);
    }

    #[test]
    fn test_truncated_advertisement_is_recovered() {
        let mut pipeline = pipeline(false);
        let bad = advertisement(TEST_MAC, vec![0x02, 0x01, 0x06, 0x1E, 0x16, 0x95]);

        assert!(matches!(
            pipeline.handle_at(&bad, 100),
            Err(DecodeError::Truncated { .. })
        ));
        // The same device still decodes afterwards.
        pipeline.handle_at(&atc_advertisement(TEST_MAC), 101).unwrap();

        let m = pipeline.metrics();
        assert_eq!(m.advertisement_count.get(), 2);
        // The undecodable first sighting used up the detailed log, so the
        // device is counted neither as a device nor as a supported one.
        assert_eq!(m.device_count.get(), 0);
        assert_eq!(m.device_supported_count.get(), 0);
    }

    #[test]
    fn test_lone_decode_error_does_not_count_device() {
        let mut pipeline = pipeline(false);
        let bad = advertisement(TEST_MAC, vec![0x02, 0x01, 0x06, 0x1E, 0x16, 0x95]);
        assert!(pipeline.handle_at(&bad, 100).is_err());

        let m = pipeline.metrics();
        assert_eq!(m.advertisement_count.get(), 1);
        assert_eq!(m.device_count.get(), 0);
        assert_eq!(pipeline.tracker().last_seen(&TEST_MAC), Some(100));
    }

    #[test]
    fn test_debug_counts_device_once_after_decode_error() {
        let mut pipeline = pipeline(true);
        let bad = advertisement(TEST_MAC, vec![0x05, 0x16]);
        assert!(pipeline.handle_at(&bad, 100).is_err());
        assert_eq!(pipeline.metrics().device_count.get(), 0);

        pipeline.handle_at(&atc_advertisement(TEST_MAC), 101).unwrap();
        pipeline.handle_at(&atc_advertisement(TEST_MAC), 102).unwrap();

        let m = pipeline.metrics();
        assert_eq!(m.device_count.get(), 1);
        assert_eq!(m.device_supported_count.get(), 1);
    }

    #[test]
    fn test_detailed_line_unknown_is_silent_unless_verbose() {
        let adv = advertisement(OTHER_MAC, FLAGS.to_vec());
        let reading = SensorReading::default();

        assert_eq!(pipeline(false).detailed_line(&adv, "", &reading), None);

        let verbose = Pipeline::new(NameDirectory::new(), Metrics::new().unwrap(), true, false);
        let line = verbose.detailed_line(&adv, "", &reading).unwrap();
        assert!(line.contains("Data: 020106 [3]"));
        assert!(line.ends_with("[NotConnectable Unknown]"));
    }

    #[test]
    fn test_detailed_line_unsupported_and_error_get_raw_line() {
        let adv = advertisement(TEST_MAC, FLAGS.to_vec());
        let verbose = Pipeline::new(NameDirectory::new(), Metrics::new().unwrap(), true, false);

        for model in [SensorModel::Unsupported, SensorModel::Error] {
            let reading = SensorReading {
                model,
                temperature_celsius: Some(21.3),
                ..Default::default()
            };
            assert_eq!(pipeline(false).detailed_line(&adv, "Kitchen", &reading), None);

            let line = verbose.detailed_line(&adv, "Kitchen", &reading).unwrap();
            assert!(line.contains(" Data: "));
            assert!(!line.contains("Temp:"));
            assert!(line.ends_with(&format!("[NotConnectable {model}]")));
        }
    }

    #[test]
    fn test_detailed_line_supported_gets_reading_line() {
        let adv = atc_advertisement(TEST_MAC);
        let reading = decode_advertisement(&adv.data).unwrap();

        let line = pipeline(false)
            .detailed_line(&adv, "Kitchen", &reading)
            .unwrap();
        assert!(line.starts_with("[a4:c1:38:d0:2c:ec] Name: Kitchen RSSI:-70 Temp:24.4"));
        assert!(line.ends_with("[NotConnectable ATC]"));
    }

    #[test]
    fn test_debug_counts_supported_after_unsupported_sighting() {
        let mut pipeline = pipeline(true);
        pipeline
            .handle_at(&advertisement(TEST_MAC, FLAGS.to_vec()), 100)
            .unwrap();
        pipeline.handle_at(&atc_advertisement(TEST_MAC), 101).unwrap();
        pipeline.handle_at(&atc_advertisement(TEST_MAC), 102).unwrap();

        let m = pipeline.metrics();
        assert_eq!(m.device_count.get(), 1);
        assert_eq!(m.device_supported_count.get(), 1);
    }

    #[test]
    fn test_unsupported_product_counts_advertisement_only() {
        let mut pipeline = pipeline(false);
        let element = mibeacon(0x045B, 0x0D, 0x04, 7, &[0xD5, 0x00, 0xC6, 0x01], 0x18);
        let adv = advertisement(TEST_MAC, payload(&[&FLAGS, &element]));

        let reading = pipeline.handle_at(&adv, 100).unwrap();
        assert_eq!(reading.model, SensorModel::Unsupported);

        let m = pipeline.metrics();
        assert_eq!(m.advertisement_supported_count.get(), 1);
        assert_eq!(m.device_supported_count.get(), 0);
    }

    #[test]
    fn test_names_label_series() {
        let mut names = NameDirectory::new();
        names.insert(TEST_MAC, "Kitchen");
        let mut pipeline = Pipeline::new(names, Metrics::new().unwrap(), false, false);
        pipeline.handle_at(&atc_advertisement(TEST_MAC), 100).unwrap();

        let text = pipeline.metrics().render().unwrap();
        assert!(text.contains("name=\"Kitchen\""));
    }

    #[tokio::test]
    async fn run_processes_every_advertisement() {
        let scanner = FakeScanner::new(vec![
            atc_advertisement(TEST_MAC),
            advertisement(OTHER_MAC, FLAGS.to_vec()),
            atc_advertisement(TEST_MAC),
        ]);
        let metrics = Metrics::new().unwrap();

        let options = Options::parse_from(["btle-exporter", "--adapter", "hci1"]);
        run(&options, &scanner, metrics.clone()).await.unwrap();

        assert_eq!(scanner.adapter.lock().unwrap().as_deref(), Some("hci1"));
        assert_eq!(metrics.advertisement_count.get(), 3);
        assert_eq!(metrics.advertisement_supported_count.get(), 2);
        assert_eq!(metrics.device_count.get(), 2);
        assert_eq!(metrics.device_supported_count.get(), 1);
    }

    #[tokio::test]
    async fn run_survives_decode_errors() {
        let scanner = FakeScanner::new(vec![
            advertisement(OTHER_MAC, vec![0x05, 0x16]),
            atc_advertisement(TEST_MAC),
        ]);
        let metrics = Metrics::new().unwrap();

        run(&options(), &scanner, metrics.clone()).await.unwrap();

        assert_eq!(metrics.advertisement_count.get(), 2);
        assert_eq!(metrics.advertisement_supported_count.get(), 1);
    }

    #[test]
    fn run_reports_scan_failure() {
        let result =
            tokio_test::block_on(run(&options(), &FailingScanner, Metrics::new().unwrap()));
        assert!(matches!(result, Err(RunError::Scan(ScanError::Bluetooth(_)))));
    }
}
