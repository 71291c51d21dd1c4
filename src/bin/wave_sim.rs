use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn, Level};
use wavemac::channel::{is_cch, WaveDataRate};
use wavemac::device::{DeviceStatus, ETHERTYPE_WSMP};
use wavemac::mac::{SimMac, SimRadio};
use wavemac::{
    ChannelNumber, ChannelState, CoordinationListener, DeviceConfig, SchInfo, Simulator, TxInfo,
    WaveDevice, WaveEvent, CCH,
};

const TRAFFIC_PERIOD_MS: u64 = 10;
const CCH_PAYLOAD_BYTES: usize = 100;
const SCH_PAYLOAD_BYTES: usize = 200;

#[derive(Debug, Clone, Serialize)]
struct SlotEntry {
    time_ms: u64,
    slot: &'static str,
    duration_ms: u64,
}

#[derive(Debug, Default)]
struct Timeline {
    entries: Vec<SlotEntry>,
}

impl Timeline {
    fn record(&mut self, now: Duration, slot: &'static str, duration: Duration) {
        self.entries.push(SlotEntry {
            time_ms: now.as_millis() as u64,
            slot,
            duration_ms: duration.as_millis() as u64,
        });
    }
}

impl CoordinationListener for Timeline {
    fn on_control_slot_start(&mut self, now: Duration, duration: Duration) {
        self.record(now, "CCH", duration);
    }

    fn on_service_slot_start(&mut self, now: Duration, duration: Duration) {
        self.record(now, "SCH", duration);
    }

    fn on_guard_slot_start(&mut self, now: Duration, duration: Duration, in_control_half: bool) {
        let slot = if in_control_half { "GUARD/CCH" } else { "GUARD/SCH" };
        self.record(now, slot, duration);
    }
}

#[derive(Debug, Serialize)]
struct Report {
    status: DeviceStatus,
    granted: bool,
    sent: BTreeMap<ChannelNumber, u64>,
    timeline: Vec<SlotEntry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("wave-sim")
        .version("0.1.0")
        .author("Vehicular Networking Team")
        .about("📡 WAVE channel coordination simulator")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increase log verbosity (-v debug, -vv trace)")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run one device through the channel coordination cycle")
                .arg(
                    Arg::with_name("config")
                        .short("c")
                        .long("config")
                        .value_name("FILE")
                        .help("Device configuration (JSON)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("mode")
                        .short("m")
                        .long("mode")
                        .value_name("MODE")
                        .help("Requested channel access")
                        .takes_value(true)
                        .possible_values(&["continuous", "alternating", "extended", "none"])
                        .default_value("alternating"),
                )
                .arg(
                    Arg::with_name("channel")
                        .long("channel")
                        .value_name("CHANNEL")
                        .help("Channel number to request")
                        .takes_value(true)
                        .default_value("172")
                        .validator(|v| match v.parse::<ChannelNumber>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Channel must be a number".into()),
                        }),
                )
                .arg(
                    Arg::with_name("extends")
                        .long("extends")
                        .value_name("COUNT")
                        .help("Sync intervals of extended access")
                        .takes_value(true)
                        .default_value("5")
                        .validator(|v| match v.parse::<u8>() {
                            Ok(n) if n > 0 && n < 0xff => Ok(()),
                            _ => Err("Extension count must be between 1 and 254".into()),
                        }),
                )
                .arg(
                    Arg::with_name("immediate")
                        .long("immediate")
                        .help("Switch channels without waiting for the channel interval"),
                )
                .arg(
                    Arg::with_name("at")
                        .long("at")
                        .value_name("MS")
                        .help("Simulation time of the access request in milliseconds")
                        .takes_value(true)
                        .default_value("0")
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Time must be a valid number".into()),
                        }),
                )
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("MS")
                        .help("Simulated time to run in milliseconds")
                        .takes_value(true)
                        .default_value("1000")
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Duration must be a valid number".into()),
                        }),
                )
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .value_name("FORMAT")
                        .help("Output format")
                        .takes_value(true)
                        .possible_values(&["json", "table"])
                        .default_value("table"),
                )
                .arg(
                    Arg::with_name("realtime")
                        .long("realtime")
                        .help("Pace simulated time against the wall clock"),
                ),
        )
        .subcommand(
            SubCommand::with_name("check-config")
                .about("Load and validate a device configuration file")
                .arg(
                    Arg::with_name("file")
                        .help("Configuration file (JSON)")
                        .required(true)
                        .index(1),
                ),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match matches.subcommand() {
        ("run", Some(sub_matches)) => handle_run(sub_matches, level != Level::INFO).await?,
        ("check-config", Some(sub_matches)) => handle_check_config(sub_matches)?,
        _ => unreachable!("subcommand required"),
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => match DeviceConfig::from_file(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                println!("{} {}", "❌ Invalid configuration:".red().bold(), e);
                Err(e.into())
            }
        },
        None => Ok(DeviceConfig::default()),
    }
}

fn handle_check_config(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let path = matches.value_of("file").unwrap_or_default();
    let config = load_config(Some(path))?;
    println!("{} {}", "✅ Configuration valid:".green().bold(), path);
    println!("  CCH interval:   {} ms", config.coordination.cch_interval_ms);
    println!("  SCH interval:   {} ms", config.coordination.sch_interval_ms);
    println!("  Guard interval: {} ms", config.coordination.guard_interval_ms);
    println!("  IP on CCH:      {}", config.ip_on_cch);
    println!("  Queue capacity: {} frames", config.queue_capacity);
    Ok(())
}

fn sch_info(mode: &str, channel: ChannelNumber, immediate: bool, extends: u8) -> Option<SchInfo> {
    let extended_access = match mode {
        "continuous" => 0xff,
        "alternating" => 0,
        "extended" => extends,
        _ => return None,
    };
    Some(SchInfo::new(channel, immediate, extended_access))
}

async fn handle_run(matches: &ArgMatches<'_>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(matches.value_of("config"))?;
    let mode = matches.value_of("mode").unwrap_or("alternating");
    let channel: ChannelNumber = matches.value_of("channel").unwrap_or("172").parse()?;
    let extends: u8 = matches.value_of("extends").unwrap_or("5").parse()?;
    let at_ms: u64 = matches.value_of("at").unwrap_or("0").parse()?;
    let duration_ms: u64 = matches.value_of("duration").unwrap_or("1000").parse()?;
    let format = matches.value_of("format").unwrap_or("table");
    let immediate = matches.is_present("immediate");
    let realtime = matches.is_present("realtime");

    let mut sim: Simulator<WaveEvent> = Simulator::new();
    let mut device = WaveDevice::new(config, Box::new(SimRadio::new()), Box::new(SimMac::new()))?;
    device.initialize(&mut sim)?;

    let timeline = Rc::new(RefCell::new(Timeline::default()));
    device.register_listener(timeline.clone(), sim.now());

    let request = sch_info(mode, channel, immediate, extends);
    let mut granted = false;
    let mut sent: BTreeMap<ChannelNumber, u64> = BTreeMap::new();
    let mut ticker = time::interval(Duration::from_millis(1));

    for ms in 0..=duration_ms {
        if realtime {
            ticker.tick().await;
        }
        let now = Duration::from_millis(ms);
        sim.run_until(now, |event, sim| device.handle_event(event, sim));

        if ms == at_ms {
            if let Some(info) = request {
                granted = device.start_sch(&info, &mut sim);
                if granted {
                    info!("access request on channel {} accepted at {} ms", info.channel, ms);
                } else {
                    warn!("access request on channel {} rejected at {} ms", info.channel, ms);
                }
            }
        }

        if ms % TRAFFIC_PERIOD_MS == 0 {
            device.send_x(vec![0; CCH_PAYLOAD_BYTES], ETHERTYPE_WSMP, &TxInfo::new(CCH));
            if !is_cch(channel) {
                device.send_x(vec![0; SCH_PAYLOAD_BYTES], ETHERTYPE_WSMP, &TxInfo::new(channel));
            }
        }

        if let Some(frame) = device.next_frame() {
            let airtime = WaveDataRate::Ofdm6M.airtime(frame.payload.len());
            if device.can_transmit(airtime, now) {
                device.confirm_sent();
                *sent.entry(frame.channel).or_insert(0) += 1;
            }
        }
    }

    let end = Duration::from_millis(duration_ms);
    let report = Report {
        status: device.status(end),
        granted,
        sent,
        timeline: timeline.borrow().entries.clone(),
    };
    device.dispose(&mut sim);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&report, verbose),
    }
    Ok(())
}

fn state_label(state: ChannelState) -> ColoredString {
    match state {
        ChannelState::Active => "ACTIVE".bright_green(),
        ChannelState::Inactive => "INACTIVE".yellow(),
        ChannelState::Dead => "DEAD".dimmed(),
    }
}

fn print_report(report: &Report, verbose: bool) {
    if verbose {
        println!("{}", "Slot timeline".bright_blue().bold());
        for entry in &report.timeline {
            println!("  {:>8} ms  {:<10} {:>3} ms", entry.time_ms, entry.slot, entry.duration_ms);
        }
        println!();
    }

    let status = &report.status;
    println!("{}", "📡 WAVE device status".bright_blue().bold());
    println!("  Time:           {} ms", status.time_ms);
    println!(
        "  Access:         {:?}{}",
        status.access,
        status
            .granted_channel
            .map(|c| format!(" on channel {}", c))
            .unwrap_or_default()
    );
    if let Some(extends) = status.extends {
        println!("  Extensions:     {}", extends);
    }
    println!(
        "  Request:        {}",
        if report.granted { "ACCEPTED".green() } else { "NOT GRANTED".red() }
    );
    println!("  Radio channel:  {}", status.radio_channel);
    println!(
        "  Slots:          {} guard, {} CCH, {} SCH",
        status.coordinator.guard_slots, status.coordinator.control_slots, status.coordinator.service_slots
    );
    println!();

    println!("┌─────────┬──────────┬────────┬────────┐");
    println!("│ Channel │ State    │ Queued │ Sent   │");
    println!("├─────────┼──────────┼────────┼────────┤");
    for channel in &status.channels {
        let sent = report.sent.get(&channel.channel).copied().unwrap_or(0);
        println!(
            "│ {:>7} │ {:<8} │ {:>6} │ {:>6} │",
            channel.channel,
            state_label(channel.state),
            channel.queued,
            sent
        );
    }
    println!("└─────────┴──────────┴────────┴────────┘");

    let queues = &status.queue_stats;
    println!(
        "  Frames: {} queued, {} sent, {} dropped, {} requeued",
        queues.enqueued, queues.sent, queues.dropped, queues.requeued
    );
}
