//! session-runner: headless authority + observers on a loopback network.
//!
//! Usage:
//!   session-runner --seed 12345 --days 5 --observers 3
//!   session-runner --config data/session.json --ipc-mode

use anyhow::{bail, ensure, Result};
use daybank_core::{
    command::PlayerCommand,
    config::SessionConfig,
    delivery::DeliveryZone,
    engine::{pump, SessionEngine},
    net::LoopbackHub,
    replication::ReplicatedSnapshot,
    rng::{RngBank, RngStream, StreamRng},
    round_timer::RoundPhase,
    types::{new_session_id, ConnectionId, Day, Money, Tick, HOST_CONNECTION_ID},
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Tick {
        count: u64,
    },
    /// Run a command on one node. Node 0 is the authority.
    Command {
        #[serde(default)]
        node:    ConnectionId,
        command: PlayerCommand,
    },
    Connect {
        connection_id: ConnectionId,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct NodeState {
    connection_id:  ConnectionId,
    connected:      bool,
    snapshot:       ReplicatedSnapshot,
    displayed_secs: f64,
    discarded:      u64,
    gameplay_ui:    bool,
}

#[derive(serde::Serialize)]
struct UiState {
    tick:           Tick,
    paused:         bool,
    phase:          RoundPhase,
    remaining_secs: f64,
    day:            Day,
    current_money:  Money,
    banked_money:   Money,
    target_money:   Money,
    barrier:        Option<u64>,
    pending_value:  Money,
    observers:      Vec<NodeState>,
}

struct Session {
    hub:        LoopbackHub,
    authority:  SessionEngine,
    observers:  Vec<SessionEngine>,
    zone:       DeliveryZone,
    deliveries: StreamRng,
    penalties:  StreamRng,
    network:    StreamRng,
    dt:         f64,
}

impl Session {
    fn build(seed: u64, observers: u64, config: SessionConfig, dt: f64) -> Result<Self> {
        ensure!(dt > 0.0, "--dt must be greater than 0, got {dt}");
        let hub = LoopbackHub::new();
        let session_id = new_session_id();
        let mut authority = SessionEngine::authority(session_id.clone(), config.clone(), &hub)?;

        let zone = DeliveryZone::new("delivery-zone", 10);
        authority.add_pre_expiry_hook(Box::new(zone.clone()));

        let observers = (1..=observers)
            .map(|id| SessionEngine::observer(session_id.clone(), config.clone(), &hub, id))
            .collect::<Result<Vec<_>, _>>()?;

        let bank = RngBank::new(seed);
        let mut session = Self {
            hub,
            authority,
            observers,
            zone,
            deliveries: bank.stream(RngStream::Deliveries),
            penalties:  bank.stream(RngStream::Penalties),
            network:    bank.stream(RngStream::Network),
            dt,
        };
        let ids: Vec<ConnectionId> = session.observers.iter().map(|o| o.local_id()).collect();
        for id in ids {
            session.authority.peer_connected(id)?;
        }
        session.pump()?;
        Ok(session)
    }

    fn pump(&mut self) -> Result<usize> {
        let mut nodes: Vec<&mut SessionEngine> = std::iter::once(&mut self.authority)
            .chain(self.observers.iter_mut())
            .collect();
        Ok(pump(&self.hub, &mut nodes)?)
    }

    fn observer_mut(&mut self, id: ConnectionId) -> Option<&mut SessionEngine> {
        self.observers.iter_mut().find(|o| o.local_id() == id)
    }

    /// One frame: simulated deliveries, every node ticks, network drains,
    /// observers acknowledge scenes they were asked to load.
    fn step(&mut self) -> Result<()> {
        if self.authority.timer().is_running() {
            if self.deliveries.chance(0.05) {
                self.zone.deliver(self.deliveries.range_i64(10, 60));
            }
            if self.penalties.chance(0.005) {
                self.zone.penalize(self.penalties.range_i64(5, 20));
            }
        }

        self.authority.tick(self.dt)?;
        for observer in &mut self.observers {
            observer.tick(self.dt)?;
        }
        self.pump()?;

        for observer in &mut self.observers {
            if !self.hub.is_connected(observer.local_id()) {
                continue;
            }
            let generation = match observer.pending_scene() {
                Some((generation, _)) => *generation,
                None => continue,
            };
            // Loading takes a few frames on some peers.
            if self.network.chance(0.3) {
                observer.scene_loaded(generation);
            }
        }
        self.pump()?;
        Ok(())
    }

    fn connect(&mut self, id: ConnectionId) -> Result<()> {
        if id == HOST_CONNECTION_ID {
            bail!("connection {id} is the authority");
        }
        if self.observer_mut(id).is_none() {
            let session_id = self.authority.session_id.clone();
            let config = self.authority.config().clone();
            let observer = SessionEngine::observer(session_id, config, &self.hub, id)?;
            self.observers.push(observer);
        } else {
            self.hub.connect(id);
        }
        self.authority.peer_connected(id)?;
        self.pump()?;
        Ok(())
    }

    fn disconnect(&mut self, id: ConnectionId) -> Result<()> {
        if id == HOST_CONNECTION_ID {
            bail!("connection {id} is the authority");
        }
        self.hub.disconnect(id);
        self.authority.peer_disconnected(id)?;
        self.pump()?;
        Ok(())
    }

    fn ui_state(&self) -> UiState {
        let economy = self.authority.economy();
        let round = self.authority.round();
        UiState {
            tick:           self.authority.clock.current_tick,
            paused:         self.authority.clock.paused,
            phase:          round.phase,
            remaining_secs: round.remaining,
            day:            economy.current_day(),
            current_money:  economy.current_money(),
            banked_money:   economy.banked_money(),
            target_money:   economy.target_money(),
            barrier:        self.authority.scene_barrier_pending(),
            pending_value:  self.zone.pending_value(),
            observers: self
                .observers
                .iter()
                .map(|o| NodeState {
                    connection_id:  o.local_id(),
                    connected:      self.hub.is_connected(o.local_id()),
                    snapshot:       *o.snapshot(),
                    displayed_secs: o.projection().displayed_remaining(),
                    discarded:      o.projection().discarded(),
                    gameplay_ui:    o.gameplay_ui_visible(),
                })
                .collect(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let days = parse_arg(&args, "--days", 3u32);
    let observers = parse_arg(&args, "--observers", 2u64);
    let dt = parse_arg(&args, "--dt", 0.1f64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str());

    let config = match config_path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    if !ipc_mode {
        println!("daybank session-runner");
        println!("  seed:      {seed}");
        println!("  days:      {days}");
        println!("  observers: {observers}");
        println!("  config:    {}", config_path.unwrap_or("(defaults)"));
        println!();
    }

    let mut session = Session::build(seed, observers, config, dt)?;

    if ipc_mode {
        run_ipc_loop(&mut session)?;
    } else {
        run_days(&mut session, days)?;
        print_summary(&session);
    }

    Ok(())
}

/// Play until `days` rounds have been evaluated or the session ends.
/// The first observer presses start and confirms every advance, so both
/// requests travel through the network to the authority.
fn run_days(session: &mut Session, days: u32) -> Result<()> {
    match session.observers.first_mut() {
        Some(first) => {
            first.request_start()?;
        }
        None => {
            session.authority.request_start()?;
        }
    }
    session.pump()?;

    let max_steps = (session.authority.config().round.duration_secs / session.dt).ceil() as u64
        * (days as u64 + 1)
        * 4;
    let mut evaluated = 0;
    for _ in 0..max_steps {
        let before = session.authority.event_log().count_of("round_evaluated");
        session.step()?;
        evaluated += session.authority.event_log().count_of("round_evaluated") - before;

        if !session.authority.session_started() || evaluated >= days as usize {
            break;
        }
        if session.authority.round().phase == RoundPhase::AwaitingAdvance {
            match session.observers.first_mut() {
                Some(first) => {
                    first.confirm_advance()?;
                }
                None => {
                    session.authority.confirm_advance()?;
                }
            }
            session.pump()?;
        }
    }
    Ok(())
}

fn run_ipc_loop(session: &mut Session) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => {}
            IpcCommand::Tick { count } => {
                for _ in 0..count {
                    session.step()?;
                }
            }
            IpcCommand::Command { node, command } => {
                log::debug!("ipc: {} on node {node}", command.kind());
                if node == session.authority.local_id() {
                    session.authority.execute(command)?;
                } else if let Some(observer) = session.observer_mut(node) {
                    observer.execute(command)?;
                } else {
                    log::warn!("ipc: no node {node}");
                }
                session.pump()?;
            }
            IpcCommand::Connect { connection_id } | IpcCommand::Disconnect { connection_id }
                if connection_id == HOST_CONNECTION_ID =>
            {
                let err_json = serde_json::json!({ "error": "connection 0 is the authority" });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
            IpcCommand::Connect { connection_id } => session.connect(connection_id)?,
            IpcCommand::Disconnect { connection_id } => session.disconnect(connection_id)?,
        }
        writeln!(stdout, "{}", serde_json::to_string(&session.ui_state())?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn print_summary(session: &Session) {
    let authority = &session.authority;
    let economy = authority.economy();
    let log = authority.event_log();
    let stats = session.hub.stats();

    println!("=== SESSION SUMMARY ===");
    println!("  session_id:     {}", authority.session_id);
    println!("  final tick:     {}", authority.clock.current_tick);
    println!("  day:            {}", economy.current_day());
    println!("  target:         {}", economy.target_money());
    println!("  current money:  {}", economy.current_money());
    println!("  banked money:   {}", economy.banked_money());
    println!("  session active: {}", authority.session_started());
    println!("  rounds won:     {}", count_payload(log.entries().iter().map(|e| &e.payload), "\"success\":true"));
    println!("  rounds lost:    {}", count_payload(log.entries().iter().map(|e| &e.payload), "\"success\":false"));
    println!("  packages:       {}", session.zone.settled_count());
    println!("  events logged:  {}", log.len());
    println!("  late acks:      {}", authority.late_scene_acks());
    println!("  net delivered:  {}", stats.delivered);
    println!("  net dropped:    {}", stats.dropped);

    println!();
    println!("=== OBSERVERS ===");
    for observer in &session.observers {
        let snap = observer.snapshot();
        let converged = snap == authority.snapshot();
        println!(
            "  peer {} | day {} | target {} | banked {} | stale updates {} | {}",
            observer.local_id(),
            snap.current_day,
            snap.target_money,
            snap.banked_money,
            observer.projection().discarded(),
            if converged { "in sync" } else { "DIVERGED" }
        );
    }
}

fn count_payload<'a>(payloads: impl Iterator<Item = &'a String>, needle: &str) -> usize {
    payloads.filter(|p| p.contains(needle)).count()
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
