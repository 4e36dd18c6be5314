use crate::error::SchemeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), SchemeError> {
        if self.max_chars == 0 {
            return Err(SchemeError::validation("chunk max_chars must be positive"));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(SchemeError::validation(format!(
                "chunk overlap_chars ({}) must be smaller than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }

    /// New characters each passage contributes beyond the carried overlap.
    pub fn stride(&self) -> usize {
        self.max_chars.saturating_sub(self.overlap_chars).max(1)
    }
}

/// One bounded passage of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub text: String,
    /// Char offset in the source text where this passage's new content starts.
    pub offset: usize,
    /// Number of leading chars repeated from the previous passage.
    pub overlap: usize,
}

impl Passage {
    /// The passage without the context carried over from its predecessor.
    pub fn fresh_text(&self) -> String {
        self.text.chars().skip(self.overlap).collect()
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits `text` into passages of at most `config.max_chars` chars. Each
/// passage repeats the last `config.overlap_chars` chars of the text before
/// it, then adds up to `config.stride()` new chars, ending on whitespace
/// when a break exists in the back half of that window.
pub fn split(text: &str, config: ChunkingConfig) -> Result<Vec<Passage>, SchemeError> {
    config.validate()?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let stride = config.stride();
    let mut passages = Vec::with_capacity(chars.len() / stride + 1);
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + stride).min(chars.len());
        let end = if hard_end < chars.len() {
            snap_to_break(&chars, start, hard_end)
        } else {
            hard_end
        };

        let overlap = config.overlap_chars.min(start);
        passages.push(Passage {
            text: chars[start - overlap..end].iter().collect(),
            offset: start,
            overlap,
        });

        start = end;
    }

    Ok(passages)
}

fn snap_to_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    let floor = start + (hard_end - start) / 2 + 1;
    (floor..=hard_end)
        .rev()
        .find(|&candidate| chars[candidate - 1].is_whitespace())
        .unwrap_or(hard_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(passages: &[Passage]) -> String {
        passages.iter().map(Passage::fresh_text).collect()
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof \u{a0}  spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn text_without_breaks_of_2600_chars_gives_four_passages() {
        let text = "x".repeat(2_600);
        let passages = split(&text, ChunkingConfig::default()).expect("split should succeed");

        assert_eq!(passages.len(), 4);
        assert!(passages.iter().all(|passage| passage.text.chars().count() <= 1_000));
        assert!(passages[3].text.chars().count() < 1_000);
        assert_eq!(reconstruct(&passages), text);
    }

    #[test]
    fn consecutive_passages_share_the_configured_overlap() {
        let text: String = (0..3_000)
            .map(|index| char::from(b'a' + (index % 26) as u8))
            .collect();
        let passages = split(&text, ChunkingConfig::default()).expect("split should succeed");

        for pair in passages.windows(2) {
            let previous: Vec<char> = pair[0].text.chars().collect();
            let tail: String = previous[previous.len() - 200..].iter().collect();
            let head: String = pair[1].text.chars().take(200).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn passages_reconstruct_prose_and_end_on_word_boundaries() {
        let text = "Eligible farmers receive an annual income support payment. ".repeat(60);
        let config = ChunkingConfig {
            max_chars: 300,
            overlap_chars: 50,
        };
        let passages = split(&text, config).expect("split should succeed");

        assert!(passages.len() > 1);
        assert_eq!(reconstruct(&passages), text);
        for passage in &passages[..passages.len() - 1] {
            assert!(passage.text.chars().count() <= 300);
            assert!(passage.text.ends_with(' '));
        }
    }

    #[test]
    fn short_text_is_a_single_passage() {
        let passages = split("PM Kisan Samman Nidhi", ChunkingConfig::default())
            .expect("split should succeed");
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "PM Kisan Samman Nidhi");
        assert_eq!(passages[0].overlap, 0);
    }

    #[test]
    fn trailing_remainder_is_kept_and_nothing_is_empty() {
        let text = "y".repeat(1_650);
        let passages = split(&text, ChunkingConfig::default()).expect("split should succeed");

        assert_eq!(passages.len(), 3);
        assert_eq!(passages[2].fresh_text().chars().count(), 50);
        assert!(passages.iter().all(|passage| !passage.text.is_empty()));
    }

    #[test]
    fn blank_text_yields_no_passages() {
        let passages = split("  \n\t ", ChunkingConfig::default()).expect("split should succeed");
        assert!(passages.is_empty());
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "Benefit of Rs 5000 per year for landholding families. ".repeat(40);
        let first = split(&text, ChunkingConfig::default()).expect("split should succeed");
        let second = split(&text, ChunkingConfig::default()).expect("split should succeed");
        assert_eq!(first, second);
    }

    #[test]
    fn lengths_are_counted_in_chars_not_bytes() {
        let text = "किसान ".repeat(400);
        let config = ChunkingConfig {
            max_chars: 100,
            overlap_chars: 20,
        };
        let passages = split(&text, config).expect("split should succeed");

        assert!(passages.iter().all(|passage| passage.text.chars().count() <= 100));
        assert_eq!(reconstruct(&passages), text);
    }

    #[test]
    fn overlap_must_be_smaller_than_max() {
        let config = ChunkingConfig {
            max_chars: 100,
            overlap_chars: 100,
        };
        assert!(matches!(split("abc", config), Err(SchemeError::Validation(_))));

        let zero = ChunkingConfig {
            max_chars: 0,
            overlap_chars: 0,
        };
        assert!(zero.validate().is_err());
    }
}
