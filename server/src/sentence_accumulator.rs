//! Finalization policy that turns a stream of committed sub-segments into
//! translation units (§4.5).
//!
//! LTR languages cut on sentence-ending punctuation. RTL languages have no
//! such signal in the source transcript, so they instead accumulate while
//! a "streak" of in-progress text continues and finalize on the first gap,
//! suppressing a finalized unit that turns out to be a strict prefix of
//! the previous one (the RTL decoder tends to restate the tail of the
//! previous utterance before extending it).

pub const RTL_LANGUAGES: &[&str] = &["ar", "he", "fa", "ur", "ps", "sd"];

pub fn is_rtl(language: &str) -> bool {
    RTL_LANGUAGES.contains(&language)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedUnit {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

fn find_last_terminator(s: &str) -> Option<usize> {
    s.char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '؟'))
        .last()
        .map(|(i, c)| i + c.len_utf8())
}

#[derive(Debug, Default)]
struct LtrAccumulator {
    buffer: String,
}

impl LtrAccumulator {
    fn feed(&mut self, text: &str) -> Option<String> {
        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(text.trim());
        let cut = find_last_terminator(&self.buffer)?;
        let completed = self.buffer[..cut].trim().to_string();
        self.buffer = self.buffer[cut..].trim_start().to_string();
        if completed.is_empty() {
            None
        } else {
            Some(completed)
        }
    }

    fn take_idle(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        let trimmed = remaining.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

#[derive(Debug, Default)]
struct RtlAccumulator {
    buffer: String,
    previous_finalized: String,
    in_streak: bool,
}

impl RtlAccumulator {
    fn feed(&mut self, text: &str, translate: bool) -> Option<String> {
        if translate {
            let combined = if self.buffer.is_empty() {
                text.trim().to_string()
            } else {
                format!("{} {}", text.trim(), self.buffer)
            };
            self.buffer = combined.trim().to_string();
            self.in_streak = true;
            return None;
        }
        if !self.in_streak || self.buffer.is_empty() {
            self.in_streak = false;
            return None;
        }
        self.in_streak = false;
        let finalized = std::mem::take(&mut self.buffer);
        if self
            .previous_finalized
            .to_lowercase()
            .trim()
            .starts_with(finalized.to_lowercase().trim())
        {
            return None;
        }
        self.previous_finalized = finalized.clone();
        Some(finalized)
    }

    fn take_idle(&mut self) -> Option<String> {
        self.in_streak = false;
        let finalized = std::mem::take(&mut self.buffer);
        if finalized.is_empty() {
            return None;
        }
        if self
            .previous_finalized
            .to_lowercase()
            .trim()
            .starts_with(finalized.to_lowercase().trim())
        {
            return None;
        }
        self.previous_finalized = finalized.clone();
        Some(finalized)
    }
}

enum Kind {
    Ltr(LtrAccumulator),
    Rtl(RtlAccumulator),
}

/// Owns the finalization state for one speaker's translation stream.
/// Not shared: the ASR driver loop is the sole owner and caller.
pub struct SentenceAccumulator {
    kind: Kind,
    previous_translate: bool,
    unit_start: Option<f64>,
    unit_end: Option<f64>,
}

impl SentenceAccumulator {
    pub fn new(rtl: bool) -> Self {
        SentenceAccumulator {
            kind: if rtl {
                Kind::Rtl(RtlAccumulator::default())
            } else {
                Kind::Ltr(LtrAccumulator::default())
            },
            previous_translate: false,
            unit_start: None,
            unit_end: None,
        }
    }

    fn take_span(&mut self, fallback_start: f64, fallback_end: f64) -> (f64, f64) {
        (
            self.unit_start.take().unwrap_or(fallback_start),
            self.unit_end.take().unwrap_or(fallback_end),
        )
    }

    /// Feed one committed sub-segment. `translate` is whether this
    /// sub-segment is itself a candidate for translation (LTR always
    /// passes `true`; RTL toggles based on decode continuity).
    pub fn on_event(
        &mut self,
        text: &str,
        translate: bool,
        start: f64,
        end: f64,
    ) -> Option<FinalizedUnit> {
        if translate && !self.previous_translate {
            self.unit_start = Some(start);
        }
        if translate {
            self.unit_end = Some(end);
        }
        let finalized_text = match &mut self.kind {
            Kind::Ltr(acc) => {
                if translate {
                    acc.feed(text)
                } else {
                    None
                }
            }
            Kind::Rtl(acc) => acc.feed(text, translate),
        };
        self.previous_translate = translate;
        finalized_text.map(|text| {
            let (start, end) = self.take_span(start, end);
            FinalizedUnit { start, end, text }
        })
    }

    /// Flush whatever partial unit is pending, used when a speaker goes
    /// idle or disconnects with unfinalized text still buffered.
    pub fn idle_finalize(&mut self) -> Option<FinalizedUnit> {
        let finalized_text = match &mut self.kind {
            Kind::Ltr(acc) => acc.take_idle(),
            Kind::Rtl(acc) => acc.take_idle(),
        };
        self.previous_translate = false;
        finalized_text.map(|text| {
            let (start, end) = self.take_span(0.0, 0.0);
            FinalizedUnit { start, end, text }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ltr_cuts_on_terminal_punctuation() {
        let mut acc = SentenceAccumulator::new(false);
        assert!(acc.on_event("Hello there", true, 0.0, 1.0).is_none());
        let unit = acc.on_event("how are you?", true, 1.0, 2.0).unwrap();
        assert_eq!(unit.text, "Hello there how are you?");
        assert_eq!(unit.start, 0.0);
        assert_eq!(unit.end, 2.0);
    }

    #[test]
    fn ltr_keeps_remainder_after_cut() {
        let mut acc = SentenceAccumulator::new(false);
        acc.on_event("First sentence.", true, 0.0, 1.0).unwrap();
        assert!(acc.on_event("Second starts", true, 1.0, 2.0).is_none());
        let unit = acc.on_event("here.", true, 2.0, 3.0).unwrap();
        assert_eq!(unit.text, "Second starts here.");
    }

    #[test]
    fn rtl_accumulates_newest_first_and_finalizes_on_gap() {
        let mut acc = SentenceAccumulator::new(true);
        assert!(acc.on_event("اهلا ", true, 0.0, 1.0).is_none());
        assert!(acc.on_event("بالعالم", true, 1.0, 2.0).is_none());
        let unit = acc.on_event("", false, 2.0, 2.0).unwrap();
        assert_eq!(unit.text, "بالعالم اهلا");
    }

    #[test]
    fn rtl_suppresses_prefix_duplicate_of_previous_unit() {
        let mut acc = SentenceAccumulator::new(true);
        acc.on_event("اهلا ", true, 0.0, 1.0);
        acc.on_event("بالعالم", true, 1.0, 2.0);
        let first = acc.on_event("", false, 2.0, 2.0).unwrap();
        assert_eq!(first.text, "بالعالم اهلا");

        acc.on_event("بالعالم", true, 3.0, 4.0);
        let second = acc.on_event("", false, 4.0, 4.0);
        assert!(second.is_none(), "prefix repeat must be suppressed");
    }
}
