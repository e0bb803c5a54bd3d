//! Sends log lines to a listener the way a game server does.
//!
//! Replays a log file line by line when `--file` is given, otherwise
//! generates a short random match.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use clap::Parser;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::encode_secreted;
use std::path::PathBuf;
use tokio::net::UdpSocket;
use tokio::time::{sleep, Duration};

const TIMESTAMP_FORMAT: &str = "%m/%d/%Y - %H:%M:%S";
const CLASSES: [&str; 9] = [
    "scout",
    "soldier",
    "pyro",
    "demoman",
    "heavyweapons",
    "engineer",
    "medic",
    "sniper",
    "spy",
];
const WEAPONS: [&str; 6] = [
    "scattergun",
    "tf_projectile_rocket",
    "tf_projectile_pipe",
    "minigun",
    "sniperrifle",
    "knife",
];

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Listener address
    #[clap(short, long, default_value = "127.0.0.1:27115")]
    target: String,
    /// Log secret of the server being impersonated
    #[clap(short, long)]
    secret: i64,
    /// Log file to replay instead of a generated match
    #[clap(short, long)]
    file: Option<PathBuf>,
    /// Pause between lines in milliseconds
    #[clap(short, long, default_value = "5")]
    delay_ms: u64,
    /// Rounds in a generated match
    #[clap(short, long, default_value = "3")]
    rounds: u32,
}

struct Player {
    name: String,
    user_id: u32,
    steam_id: String,
    team: &'static str,
}

impl Player {
    fn tag(&self) -> String {
        format!(
            "\"{}<{}><{}><{}>\"",
            self.name, self.user_id, self.steam_id, self.team
        )
    }
}

/// Builds log line bodies for a random match, one timestamp per line
struct MatchScript<R: Rng> {
    rng: R,
    clock: NaiveDateTime,
    lines: Vec<String>,
}

impl<R: Rng> MatchScript<R> {
    fn new(rng: R, start: NaiveDateTime) -> Self {
        Self {
            rng,
            clock: start,
            lines: Vec::new(),
        }
    }

    fn push(&mut self, body: String) {
        self.clock += ChronoDuration::seconds(self.rng.gen_range(1..=8));
        self.lines
            .push(format!("{}: {}", self.clock.format(TIMESTAMP_FORMAT), body));
    }

    fn generate(mut self, rounds: u32) -> Vec<String> {
        let players: Vec<Player> = (0..12u32)
            .map(|i| Player {
                name: format!("player{}", i + 1),
                user_id: i + 2,
                steam_id: format!("[U:1:{}]", 1000 + i),
                team: if i % 2 == 0 { "Red" } else { "Blue" },
            })
            .collect();

        self.push("Log file started (file \"logs/L0000000.log\") (game \"/tf\") (version \"8835751\")".to_string());
        self.push("Loading map \"cp_process_final\"".to_string());
        for player in &players {
            self.push(format!("{} joined team \"{}\"", player.tag(), player.team));
            let class = CLASSES.choose(&mut self.rng).copied().unwrap_or("scout");
            self.push(format!("{} changed role to \"{}\"", player.tag(), class));
        }

        let mut red = 0;
        let mut blue = 0;
        for _ in 0..rounds {
            self.push("World triggered \"Round_Start\"".to_string());
            for _ in 0..self.rng.gen_range(10..40) {
                let attacker = &players[self.rng.gen_range(0..players.len())];
                let victim = players
                    .iter()
                    .filter(|p| p.team != attacker.team)
                    .nth(self.rng.gen_range(0..players.len() / 2));
                let Some(victim) = victim else { continue };
                let weapon = WEAPONS.choose(&mut self.rng).copied().unwrap_or("knife");
                self.push(format!(
                    "{} killed {} with \"{}\" (attacker_position \"0 0 0\") (victim_position \"0 0 0\")",
                    attacker.tag(),
                    victim.tag(),
                    weapon
                ));
                if self.rng.gen_bool(0.1) {
                    let speaker = &players[self.rng.gen_range(0..players.len())];
                    self.push(format!("{} say \"nice\"", speaker.tag()));
                }
            }

            let winner = if self.rng.gen_bool(0.5) {
                red += 1;
                "Red"
            } else {
                blue += 1;
                "Blue"
            };
            self.push(format!("World triggered \"Round_Win\" (winner \"{}\")", winner));
            let seconds = self.rng.gen_range(120.0..600.0);
            self.push(format!("World triggered \"Round_Length\" (seconds \"{:.2}\")", seconds));
            self.push(format!("Team \"Red\" current score \"{}\" with \"6\" players", red));
            self.push(format!("Team \"Blue\" current score \"{}\" with \"6\" players", blue));
        }

        self.push(format!("Team \"Red\" final score \"{}\" with \"6\" players", red));
        self.push(format!("Team \"Blue\" final score \"{}\" with \"6\" players", blue));
        self.push("Log file closed.".to_string());
        self.lines
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let lines: Vec<String> = match &args.file {
        Some(path) => tokio::fs::read_to_string(path)
            .await?
            .lines()
            .filter_map(|line| line.trim_end().strip_prefix("L ").map(str::to_string))
            .collect(),
        None => MatchScript::new(rand::thread_rng(), Local::now().naive_local()).generate(args.rounds),
    };

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(&args.target).await?;
    println!(
        "Sending {} lines from {} to {}",
        lines.len(),
        socket.local_addr()?,
        args.target
    );

    let delay = Duration::from_millis(args.delay_ms);
    for line in &lines {
        socket.send(&encode_secreted(args.secret, line)).await?;
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    println!("Sent {} lines", lines.len());
    Ok(())
}
