//! Performance benchmarks for the hot paths of log ingestion

use server::broadcaster::Broadcaster;
use server::matches::Match;
use shared::{decode_packet, encode_secreted, Event, EventType, LineParser, Packet, SourceLogParser};
use std::time::Instant;

const KILL: &str = r#"10/21/2023 - 14:22:11: "A<2><[U:1:1]><Red>" killed "B<3><[U:1:2]><Blue>" with "scattergun" (attacker_position "1 2 3") (victim_position "4 5 6")"#;

/// Benchmarks datagram decoding
#[test]
fn benchmark_packet_decoding() {
    let packet = encode_secreted(123_456_789, KILL);

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        match decode_packet(&packet) {
            Ok(Packet::Secreted { secret, .. }) => assert_eq!(secret, 123_456_789),
            other => panic!("Unexpected decode result: {:?}", other),
        }
    }

    let duration = start.elapsed();
    println!(
        "Packet decoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks line parsing
#[test]
fn benchmark_line_parsing() {
    let parser = SourceLogParser::new();
    let line = format!("L {}", KILL);

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let parsed = parser.parse(&line).unwrap();
        assert_eq!(parsed.event_type, EventType::Killed);
    }

    let duration = start.elapsed();
    println!(
        "Line parsing: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks folding events into a match
#[test]
fn benchmark_match_folding() {
    let parsed = SourceLogParser::new().parse(&format!("L {}", KILL)).unwrap();
    let event = Event::new(1, "srv-a", parsed.fields, parsed.created_on);
    let mut game = Match::new(1, "srv-a");

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        game.apply(&event).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Match folding: {} events in {:?} ({:.2} ns/event)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(game.player("[U:1:1]").unwrap().kills, iterations);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks fan-out to several consumers
#[tokio::test]
async fn benchmark_event_fanout() {
    let broadcaster = Broadcaster::new();
    let mut receivers = Vec::new();
    for types in [
        vec![EventType::Any],
        vec![EventType::Any],
        vec![EventType::Killed],
        vec![EventType::Say, EventType::SayTeam],
    ] {
        let (queue, receiver) = broadcaster.queue();
        broadcaster.consume(&queue, &types).await.unwrap();
        receivers.push((queue, receiver));
    }

    let parsed = SourceLogParser::new().parse(&format!("L {}", KILL)).unwrap();
    let event = Event::new(1, "srv-a", parsed.fields, parsed.created_on);

    let iterations = 10_000;
    let start = Instant::now();

    let mut delivered = 0;
    for _ in 0..iterations {
        delivered += broadcaster.emit(event.clone()).await;
    }

    let duration = start.elapsed();
    println!(
        "Event fan-out: {} events to {} deliveries in {:?} ({:.2} μs/event)",
        iterations,
        delivered,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(delivered, iterations * 3);
    assert!(receivers[3].1.try_recv().is_err());
    assert!(duration.as_millis() < 2000);
}
