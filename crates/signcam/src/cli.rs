use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::recognition::{self, RecognitionConfig, RecognizeArgs, config::load_vocabulary};

#[derive(Debug, Parser)]
#[command(name = "signcam", version, about = "Recognise hand signs from a live camera feed")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the recognition loop against a camera.
    Recognize(RecognizeArgs),
    /// Print the ordered labels of a vocabulary.
    Vocab {
        /// Built-in name (`alphabet`, `words`) or a label file.
        #[arg(value_name = "NAME|PATH")]
        vocabulary: String,
        /// Print a JSON array instead of one `index<TAB>label` line per class.
        #[arg(long = "json", action = clap::ArgAction::SetTrue)]
        json: bool,
    },
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Recognize(args) => {
            let config = RecognitionConfig::try_from(args)?;
            recognition::run(config)?;
        }
        Command::Vocab { vocabulary, json } => {
            let vocab = load_vocabulary(&vocabulary)?;
            if json {
                println!("{}", json!({ "name": vocab.name(), "labels": vocab.labels() }));
            } else {
                for (index, label) in vocab.labels().iter().enumerate() {
                    println!("{index}\t{label}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use sign_capture::Facing;
    use sign_core::ZoneRect;

    use super::*;
    use crate::recognition::ModeConfig;

    fn config(args: &[&str]) -> Result<RecognitionConfig> {
        let cli = Cli::try_parse_from(
            ["signcam", "recognize", "--model", "/models/signs.pt"]
                .iter()
                .chain(args),
        )?;
        match cli.command {
            Command::Recognize(args) => RecognitionConfig::try_from(args),
            Command::Vocab { .. } => unreachable!(),
        }
    }

    #[test]
    fn practice_defaults() {
        let config = config(&["practice", "--target", "A"]).unwrap();
        assert_eq!(config.input_size, 640);
        assert_eq!(config.decode.max_candidates, 5);
        assert_eq!(config.decode.confidence_threshold, 0.5);
        assert_eq!(config.decode.iou_threshold, 0.45);
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.capture.facing, Facing::User);
        assert_eq!(config.vocabulary.name(), "alphabet");
        assert_eq!((config.display_width, config.display_height), (640, 640));
        match config.mode {
            ModeConfig::Practice {
                target,
                auto_finish,
            } => {
                assert_eq!(target.expected_label, "A");
                assert_eq!(target.zone, ZoneRect::default());
                assert!(!auto_finish);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn word_mode_uses_word_vocabulary_and_wide_candidate_cap() {
        let config = config(&["--facing", "rear", "word", "--hold-ms", "1500"]).unwrap();
        assert_eq!(config.vocabulary.name(), "words");
        assert_eq!(config.decode.max_candidates, 20);
        assert!(!config.capture.mirrored());
        assert_eq!(
            config.mode,
            ModeConfig::Word {
                hold: Duration::from_millis(1500),
                zone: None
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config(&["--confidence", "1.5", "alphabet"]).is_err());
        assert!(config(&["--input-size", "0", "alphabet"]).is_err());
        assert!(config(&["alphabet", "--sample-every", "0"]).is_err());
        assert!(config(&["practice", "--target", "hello"]).is_err());
        assert!(config(&["practice", "--target", "A", "--zone", "0.8,0.8,0.5,0.5"]).is_err());
        assert!(config(&["--opencv", "alphabet"]).is_err() || cfg!(feature = "with-opencv"));
    }

    #[test]
    fn custom_vocabulary_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# custom set\nwave\npoint\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let config = config(&["--vocab", &path, "practice", "--target", "wave"]).unwrap();
        assert_eq!(config.vocabulary.labels(), ["wave", "point"]);
    }

    #[test]
    fn remote_models_parse_as_urls() {
        let cli = Cli::try_parse_from([
            "signcam",
            "recognize",
            "--model",
            "https://example.com/signs.pt",
            "alphabet",
        ])
        .unwrap();
        let Command::Recognize(args) = cli.command else {
            panic!("expected recognize");
        };
        let config = RecognitionConfig::try_from(args).unwrap();
        assert_eq!(config.model.to_string(), "https://example.com/signs.pt");
    }
}
