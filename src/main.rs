extern crate pretty_env_logger;
#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acw02_bridge::attribute::{AttributeTree, LoggingAttributeTree};
use acw02_bridge::bridge::{frame_stream, spawn_reader, Bridge, BridgeConfig};
use acw02_bridge::hvac::{HvacDriver, HvacStore};
use acw02_bridge::protocol::{FanSpeed, HvacMode};
use acw02_bridge::settings::{FileSettings, MemorySettings, SettingsStore};
use acw02_bridge::transport::{Transport, UartTransport};
use eyre::{Result, WrapErr};
use futures::{pin_mut, StreamExt};
use structopt::StructOpt;
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::UnboundedReceiverStream;

const SETTINGS_NAMESPACE: &str = "hvac";

#[derive(StructOpt, Debug)]
struct LinkOpt {
    /// Serial device the unit is wired to
    #[structopt(short, long, default_value = "/dev/serial0", parse(from_os_str))]
    device: PathBuf,

    /// Baud rate of the serial link
    #[structopt(short, long, default_value = "9600")]
    baud: u32,
}

#[derive(StructOpt, Debug)]
struct UnitState {
    #[structopt(short, long)]
    unpowered: bool,
    #[structopt(short, long, default_value = "cool")]
    mode: HvacMode,
    #[structopt(short, long, default_value = "24")]
    temperature: i32,
    #[structopt(short, long, default_value = "auto")]
    fan: FanSpeed,
}

#[derive(StructOpt, Debug)]
enum Opt {
    /// Bridge the unit to the attribute tree until stopped
    Serve {
        #[structopt(flatten)]
        link: LinkOpt,

        /// File the user settings are kept in
        #[structopt(short, long, default_value = "acw02-settings.toml", parse(from_os_str))]
        settings: PathBuf,

        /// Seconds between status requests
        #[structopt(short, long, default_value = "30")]
        poll: u64,

        /// Milliseconds to wait after a change before mirroring it
        #[structopt(long, default_value = "500")]
        sync_delay: u64,
    },
    /// Send a single full command
    Send {
        #[structopt(flatten)]
        link: LinkOpt,

        #[structopt(flatten)]
        state: UnitState,
    },
    /// Request status and print every frame received
    Monitor {
        #[structopt(flatten)]
        link: LinkOpt,

        /// How long to listen for, in seconds
        #[structopt(long, default_value = "10")]
        seconds: u64,
    },
}

fn open_link(link: &LinkOpt) -> Result<Arc<dyn Transport>> {
    let uart = UartTransport::open(&link.device, link.baud)
        .wrap_err_with(|| format!("Could not open {}", link.device.display()))?;
    Ok(Arc::new(uart))
}

fn build_driver(
    transport: Arc<dyn Transport>,
    settings: Box<dyn SettingsStore>,
) -> Result<HvacDriver> {
    HvacDriver::new(HvacStore::default(), transport, settings).wrap_err("Could not set up driver")
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    color_eyre::install()?;

    let opts = Opt::from_args();

    debug!("opts: {:?}", opts);

    match opts {
        Opt::Serve {
            link,
            settings,
            poll,
            sync_delay,
        } => {
            let transport = open_link(&link)?;
            let settings = FileSettings::open(&settings, SETTINGS_NAMESPACE);
            info!("using settings from {}", settings.path().display());
            let driver = Arc::new(build_driver(transport.clone(), Box::new(settings))?);
            let tree: Arc<dyn AttributeTree> = Arc::new(LoggingAttributeTree::default());
            let config = BridgeConfig {
                poll_period: Duration::from_secs(poll),
                sync_delay: Duration::from_millis(sync_delay),
                ..BridgeConfig::default()
            };

            // nothing feeds attribute writes when running standalone
            let (write_sender, write_receiver) = mpsc::unbounded_channel();
            let bridge = Bridge::new(driver, tree, config);
            println!("Bridging {} at {} baud", link.device.display(), link.baud);
            bridge.serve(transport, write_receiver).await;
            drop(write_sender);
        }
        Opt::Send { link, state } => {
            let driver = build_driver(open_link(&link)?, Box::new(MemorySettings::new()))?;
            driver
                .set_mode(state.mode)
                .wrap_err("Could not set mode")?;
            driver
                .set_temperature(state.temperature)
                .wrap_err("Could not set temperature")?;
            driver
                .set_fan_speed(state.fan)
                .wrap_err("Could not set fan speed")?;
            driver
                .set_power(!state.unpowered)
                .wrap_err("Could not set power")?;
            println!("Finished sending!");
        }
        Opt::Monitor { link, seconds } => {
            let transport = open_link(&link)?;
            let driver = build_driver(transport.clone(), Box::new(MemorySettings::new()))?;
            let config = BridgeConfig::default();
            let (chunks, reader) = spawn_reader(transport, config.read_timeout);

            driver
                .request_status()
                .wrap_err("Could not request status")?;
            {
                let frames =
                    frame_stream(UnboundedReceiverStream::new(chunks), config.quiet_window);
                pin_mut!(frames);
                let listen = async {
                    while let Some(frame) = frames.next().await {
                        println!("Received frame: {:?}", frame);
                        if let Err(e) = driver.store().apply(&frame.delta()) {
                            error!("could not apply frame: {}", e);
                        }
                    }
                };
                if time::timeout(Duration::from_secs(seconds), listen)
                    .await
                    .is_err()
                {
                    debug!("listening window closed");
                }
            }
            reader.await.wrap_err("Serial reader panicked")?;
            println!("Last known state: {:?}", driver.store().snapshot()?);
        }
    }

    Ok(())
}
