//! Built-in fallback bank: one pre-authored challenge per level.
//! Options keep their authored order; only generated challenges are shuffled.

use crate::config::ChallengeCfg;
use crate::domain::{Challenge, ChallengeSource, Level};

fn entry(level: Level, text: &str, correct: &str, errors: &[&str], options: [&str; 4]) -> Challenge {
  Challenge {
    level,
    text: text.into(),
    correct_text: correct.into(),
    errors: errors.iter().map(|s| s.to_string()).collect(),
    options: options.iter().map(|s| s.to_string()).collect(),
    source: ChallengeSource::Fallback,
  }
}

/// Static challenges, one slot per level.
#[derive(Clone, Debug, PartialEq)]
pub struct FallbackBank([Challenge; 3]);

fn slot(level: Level) -> usize {
  usize::from(level.number() - 1)
}

impl FallbackBank {
  pub fn get(&self, level: Level) -> &Challenge {
    &self.0[slot(level)]
  }

  pub fn builtin() -> Self {
    Self([
      entry(
        Level::One,
        "Yesterday, I go to the store and buys some milk. Then I comes home and drink it.",
        "Yesterday, I went to the store and bought some milk. Then I came home and drank it.",
        &[
          "'go' should be 'went'",
          "'buys' should be 'bought'",
          "'comes' should be 'came'",
          "'drink' should be 'drank'",
        ],
        [
          "Yesterday, I went to the store and bought some milk. Then I came home and drank it.",
          "Yesterday, I go to the store and buys some milk. Then I comes home and drink it.",
          "Yesterday, I will go to the store and buy some milk. Then I will come home and drink it.",
          "Yesterday, I have gone to the store and bought some milk. Then I have come home and drank it.",
        ],
      ),
      entry(
        Level::Two,
        "While I am walking to school this morning, I see my friend. She tells me she has finished the project yesterday.",
        "While I was walking to school this morning, I saw my friend. She told me she had finished the project yesterday.",
        &[
          "'am walking' should be 'was walking'",
          "'see' should be 'saw'",
          "'tells' should be 'told'",
        ],
        [
          "While I was walking to school this morning, I saw my friend. She told me she had finished the project yesterday.",
          "While I am walking to school this morning, I see my friend. She tells me she has finished the project yesterday.",
          "While I walked to school this morning, I saw my friend. She told me she finished the project yesterday.",
          "While I have walked to school this morning, I have seen my friend. She has told me she finished the project yesterday.",
        ],
      ),
      entry(
        Level::Three,
        "Next week, I went to Paris. I am visiting the Eiffel Tower and had taken many photos.",
        "Next week, I will go to Paris. I will visit the Eiffel Tower and take many photos.",
        &[
          "'went' should be 'will go'",
          "'am visiting' should be 'will visit'",
          "'had taken' should be 'take'",
        ],
        [
          "Next week, I will go to Paris. I will visit the Eiffel Tower and take many photos.",
          "Next week, I went to Paris. I am visiting the Eiffel Tower and had taken many photos.",
          "Next week, I have gone to Paris. I have visited the Eiffel Tower and have taken many photos.",
          "Next week, I go to Paris. I visit the Eiffel Tower and take many photos.",
        ],
      ),
    ])
  }

  /// Overlay TOML-provided entries. Entries whose options do not contain
  /// their corrected text exactly once among four are skipped.
  pub fn merge_overrides(&mut self, overrides: &[ChallengeCfg]) -> usize {
    let mut applied = 0;
    for cfg in overrides {
      let Ok(level) = Level::try_from(cfg.level) else {
        tracing::error!(target: "challenge", level = cfg.level, "Skipping fallback override: unsupported level.");
        continue;
      };
      let hits = cfg.options.iter().filter(|o| **o == cfg.correct_text).count();
      if cfg.options.len() != 4 || hits != 1 {
        tracing::error!(target: "challenge", %level, options = cfg.options.len(), hits, "Skipping fallback override: options must hold the corrected text once among four.");
        continue;
      }
      self.0[slot(level)] = Challenge {
        level,
        text: cfg.text.clone(),
        correct_text: cfg.correct_text.clone(),
        errors: cfg.errors.clone(),
        options: cfg.options.clone(),
        source: ChallengeSource::Fallback,
      };
      applied += 1;
    }
    applied
  }
}
