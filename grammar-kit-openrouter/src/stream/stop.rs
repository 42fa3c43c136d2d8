use regex::Regex;

use grammar_kit_dialect::max_match_width;

use crate::error::AdapterError;

/// The outcome of feeding text into a [`StreamingRegexStopMatcher`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegexStopUpdate {
    /// Text that is now safe to release to the caller.
    pub emit_text: String,
    /// Whether the stop regex has matched.
    pub matched: bool,
    /// The matched stop text, once matched.
    pub stop_text: Option<String>,
    /// Characters to rewind from state content: everything from the match
    /// start to the end of the buffered text.
    pub rewind_characters: usize,
}

/// Client-side stop-regex matcher for streamed text.
///
/// Text is buffered as it arrives; only the prefix whose suffix cannot
/// still become part of a future match is released. With a maximum match
/// width `w`, that is everything up to `len - (w - 1)` characters; an
/// unbounded (or unanalyzable) width releases nothing until the stream
/// ends. Once matched, the emitted prefix is frozen and further feeds are
/// no-ops, so streamed and whole-string inputs produce identical output.
#[derive(Debug)]
pub struct StreamingRegexStopMatcher {
    regex: Regex,
    anchored: Regex,
    buffer: String,
    emitted_len: usize,
    matched: bool,
    stop_text: Option<String>,
    max_match_width: Option<usize>,
}

impl StreamingRegexStopMatcher {
    /// Compiles a stop matcher, rejecting invalid patterns up front.
    pub fn new(pattern: &str) -> Result<Self, AdapterError> {
        let regex = Regex::new(pattern).map_err(|_| {
            AdapterError::misuse(format!("invalid stop regex pattern: {pattern}"))
        })?;
        let anchored = Regex::new(&format!("^(?:{pattern})$")).map_err(|_| {
            AdapterError::misuse(format!("invalid stop regex pattern: {pattern}"))
        })?;
        Ok(Self {
            regex,
            anchored,
            buffer: String::new(),
            emitted_len: 0,
            matched: false,
            stop_text: None,
            max_match_width: max_match_width(pattern),
        })
    }

    /// Feeds a streamed text fragment, returning what may be released.
    pub fn feed(&mut self, text: &str) -> RegexStopUpdate {
        if self.matched {
            return self.matched_update();
        }

        self.buffer.push_str(text);
        if let Some((start, end)) = self.earliest_match_bounds() {
            let emit_text = self.emit_until(start);
            self.matched = true;
            self.stop_text = Some(self.buffer[start..end].to_string());
            let rewind_characters = self.buffer[start..].chars().count();
            return RegexStopUpdate {
                emit_text,
                matched: true,
                stop_text: self.stop_text.clone(),
                rewind_characters,
            };
        }

        RegexStopUpdate {
            emit_text: self.emit_until(self.safe_emit_end()),
            ..RegexStopUpdate::default()
        }
    }

    /// Flushes remaining buffered text at end of stream.
    pub fn finish(&mut self) -> RegexStopUpdate {
        if self.matched {
            return self.matched_update();
        }
        RegexStopUpdate {
            emit_text: self.emit_until(self.buffer.len()),
            ..RegexStopUpdate::default()
        }
    }

    /// Everything released so far.
    pub fn emitted_text(&self) -> &str {
        &self.buffer[..self.emitted_len]
    }

    /// Whether the stop regex has matched.
    pub fn matched(&self) -> bool {
        self.matched
    }

    /// The matched stop text, once matched.
    pub fn stop_text(&self) -> Option<&str> {
        self.stop_text.as_deref()
    }

    fn matched_update(&self) -> RegexStopUpdate {
        RegexStopUpdate {
            emit_text: String::new(),
            matched: true,
            stop_text: self.stop_text.clone(),
            rewind_characters: 0,
        }
    }

    /// Earliest match start; same-start ties break to the earliest end, so
    /// the shortest alternative wins.
    fn earliest_match_bounds(&self) -> Option<(usize, usize)> {
        let first = self.regex.find(&self.buffer)?;
        let start = first.start();
        for end in self.char_ends_from(start) {
            if self.anchored.is_match(&self.buffer[start..end]) {
                return Some((start, end));
            }
        }
        Some((start, first.end()))
    }

    fn char_ends_from(&self, start: usize) -> Vec<usize> {
        let tail = &self.buffer[start..];
        let mut ends: Vec<usize> = tail
            .char_indices()
            .map(|(offset, _)| start + offset)
            .collect();
        ends.push(self.buffer.len());
        ends
    }

    /// Byte offset up to which buffered text cannot be part of a future
    /// match.
    fn safe_emit_end(&self) -> usize {
        match self.max_match_width {
            None => 0,
            Some(width) if width <= 1 => self.buffer.len(),
            Some(width) => {
                let total_chars = self.buffer.chars().count();
                let safe_chars = total_chars.saturating_sub(width - 1);
                self.byte_offset_of_char(safe_chars)
            }
        }
    }

    fn byte_offset_of_char(&self, char_index: usize) -> usize {
        self.buffer
            .char_indices()
            .nth(char_index)
            .map(|(offset, _)| offset)
            .unwrap_or(self.buffer.len())
    }

    fn emit_until(&mut self, end: usize) -> String {
        let bounded = end.clamp(self.emitted_len, self.buffer.len());
        let emit_text = self.buffer[self.emitted_len..bounded].to_string();
        self.emitted_len = bounded;
        emit_text
    }
}
