//! Line-oriented commands read from stdin while the loop runs.
//!
//! `finish`, `target <label>` and `quit` map onto [`LoopControl`] calls.
//! Answers are printed as JSON lines next to the result events.

use std::{
    io::{self, BufRead},
    thread,
    time::Duration,
};

use serde_json::json;
use sign_core::{LabelVocabulary, ZoneRect, validation::TargetSpec};
use tracing::{debug, warn};

use crate::recognition::{
    pipeline::{ControlError, LoopControl},
    telemetry,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Finish,
    Target(TargetSpec),
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
///
/// Labels may contain spaces, so everything after `target` is the label.
pub fn parse_console_command(
    line: &str,
    vocabulary: &LabelVocabulary,
    zone: ZoneRect,
) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line
        .split_once(char::is_whitespace)
        .map(|(verb, rest)| (verb, rest.trim()))
        .unwrap_or((line, ""));

    match verb.to_ascii_lowercase().as_str() {
        "finish" | "done" => Ok(Some(ConsoleCommand::Finish)),
        "quit" | "exit" => Ok(Some(ConsoleCommand::Quit)),
        "target" if rest.is_empty() => Err("usage: target <label>".into()),
        "target" => match vocabulary.position(rest) {
            Some(_) => Ok(Some(ConsoleCommand::Target(TargetSpec::new(
                rest,
                zone,
                Duration::ZERO,
            )))),
            None => Err(format!(
                "{rest:?} is not in vocabulary {:?}",
                vocabulary.name()
            )),
        },
        other => Err(format!("unknown command {other:?}; try finish, target <label> or quit")),
    }
}

/// Apply a parsed command, returning the JSON line to print.
pub fn apply(control: &LoopControl, command: ConsoleCommand) -> Result<serde_json::Value, ControlError> {
    match command {
        ConsoleCommand::Finish => match control.finish() {
            Ok(event) => Ok(json!({ "finish": "accepted", "sequence": event.sequence })),
            Err(ControlError::Rejected(reason)) => {
                Ok(json!({ "finish": "rejected", "reason": reason.to_string() }))
            }
            Err(err) => Err(err),
        },
        ConsoleCommand::Target(target) => {
            let label = target.expected_label.clone();
            control.set_target(target)?;
            Ok(json!({ "target": label }))
        }
        ConsoleCommand::Quit => {
            control.cancel();
            Ok(json!({ "quit": true }))
        }
    }
}

/// Read commands from stdin on a detached thread until EOF or the loop stops.
pub fn spawn_stdin_commands(
    control: LoopControl,
    vocabulary: LabelVocabulary,
    zone: ZoneRect,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("console-commands", move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("stdin closed: {err}");
                    break;
                }
            };
            let command = match parse_console_command(&line, &vocabulary, zone) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(message) => {
                    println!("{}", json!({ "error": message }));
                    continue;
                }
            };
            match apply(&control, command) {
                Ok(answer) => println!("{answer}"),
                Err(ControlError::Closed) => break,
                Err(err) => println!("{}", json!({ "error": err.to_string() })),
            }
        }
        debug!("console command reader finished");
    })
}

#[cfg(test)]
mod tests {
    use sign_core::{
        BoundingBox,
        decode::Detection,
        validation::{HoldValidator, Observation, Strategy},
    };

    use super::*;

    fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
        parse_console_command(line, &LabelVocabulary::words(), ZoneRect::default())
    }

    #[test]
    fn multi_word_targets() {
        match parse("target  thank you ").unwrap() {
            Some(ConsoleCommand::Target(target)) => {
                assert_eq!(target.expected_label, "thank you");
                assert_eq!(target.zone, ZoneRect::default());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_labels_and_verbs_are_errors() {
        assert!(parse("target goodbye").is_err());
        assert!(parse("target").is_err());
        assert!(parse("jump").is_err());
    }

    #[test]
    fn simple_verbs_and_blank_lines() {
        assert_eq!(parse("FINISH"), Ok(Some(ConsoleCommand::Finish)));
        assert_eq!(parse("quit"), Ok(Some(ConsoleCommand::Quit)));
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn target_command_keeps_the_word_hold() {
        let mut strategy = Strategy::Hold(HoldValidator::new(Duration::from_millis(1000)));
        let Ok(Some(ConsoleCommand::Target(target))) = parse("target yes") else {
            panic!("expected a target command");
        };
        strategy.set_target(target);

        let detections = [Detection {
            class_id: 0,
            label: "yes".into(),
            score: 0.9,
            bbox: BoundingBox::from_center(320.0, 320.0, 80.0, 80.0),
        }];
        let emitted: Vec<_> = [0u64, 33, 66, 999]
            .into_iter()
            .filter_map(|now_ms| {
                strategy
                    .observe(&Observation {
                        detections: &detections,
                        display_width: 640.0,
                        display_height: 640.0,
                        now_ms,
                    })
                    .emission
            })
            .collect();
        assert!(emitted.is_empty(), "emitted before the hold elapsed: {emitted:?}");
    }
}
