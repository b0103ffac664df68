//! Timed lyrics
//!
//! Parses LRC text (`[mm:ss.xx]line`) into a time-sorted list and finds the
//! line that should be showing at a playback position.

use std::ops::RangeInclusive;

/// One displayed line and the moment it starts
#[derive(Debug, Clone, PartialEq)]
pub struct LyricLine {
    pub time_secs: f64,
    pub text: String,
}

/// Lines of one track, sorted by start time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lyrics {
    lines: Vec<LyricLine>,
}

impl Lyrics {
    /// Parse LRC content.
    ///
    /// A line may carry several time tags and then appears once per tag.
    /// Lines without a time tag (including `[ar:...]` style metadata) and
    /// tagged lines with no text are skipped. Malformed tags stay in the text.
    pub fn parse(content: &str) -> Self {
        let mut lines = Vec::new();
        for raw in content.lines() {
            let (times, text) = split_tags(raw);
            if times.is_empty() || text.is_empty() {
                continue;
            }
            lines.extend(times.into_iter().map(|time_secs| LyricLine {
                time_secs,
                text: text.clone(),
            }));
        }
        // Stable: equal times keep file order
        lines.sort_by(|a, b| a.time_secs.total_cmp(&b.time_secs));
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn get(&self, index: usize) -> Option<&LyricLine> {
        self.lines.get(index)
    }

    /// Index of the last line starting at or before `position_secs`
    pub fn line_at(&self, position_secs: f64) -> Option<usize> {
        self.lines
            .partition_point(|line| line.time_secs <= position_secs)
            .checked_sub(1)
    }
}

/// Time tags found anywhere in `line` and the text left once they are removed
fn split_tags(line: &str) -> (Vec<f64>, String) {
    let mut times = Vec::new();
    let mut text = String::new();
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        text.push_str(&rest[..open]);
        let candidate = &rest[open..];
        match parse_tag(candidate) {
            Some((time, len)) => {
                times.push(time);
                rest = &candidate[len..];
            }
            None => {
                text.push('[');
                rest = &candidate[1..];
            }
        }
    }
    text.push_str(rest);
    (times, text.trim().to_string())
}

/// `[mm:ss]` or `[mm:ss.xx]`/`[mm:ss.xxx]` at the start of `s`; returns the
/// time and the tag length in bytes
fn parse_tag(s: &str) -> Option<(f64, usize)> {
    let close = s.find(']')?;
    let inner = &s[1..close];
    let (minutes, rest) = inner.split_once(':')?;
    let (seconds, fraction) = match rest.split_once('.') {
        Some((seconds, fraction)) => (seconds, Some(fraction)),
        None => (rest, None),
    };

    if !is_digits(minutes, 2..=2) || !is_digits(seconds, 2..=2) {
        return None;
    }
    let millis = match fraction {
        // Two digits are hundredths
        Some(fraction) if is_digits(fraction, 2..=3) => format!("{:0<3}", fraction).parse::<u32>().ok()?,
        Some(_) => return None,
        None => 0,
    };

    let minutes: u32 = minutes.parse().ok()?;
    let seconds: u32 = seconds.parse().ok()?;
    let total_ms = (minutes * 60 + seconds) * 1000 + millis;
    Some((total_ms as f64 / 1000.0, close + 1))
}

fn is_digits(s: &str, len: RangeInclusive<usize>) -> bool {
    len.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONG: &str = "[ti:Night Drive]\n\
        [ar:Someone]\n\
        [00:12.50]First line\n\
        [00:05.00]Intro\r\n\
        [01:02.345]Third\n\
        [00:20.10][00:40.10]Chorus\n\
        [00:30.00]\n\
        plain text without a tag\n";

    #[test]
    fn test_parse_sorts_and_expands_tags() {
        let lyrics = Lyrics::parse(SONG);
        let summary: Vec<(f64, &str)> = lyrics
            .lines()
            .iter()
            .map(|line| (line.time_secs, line.text.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (5.0, "Intro"),
                (12.5, "First line"),
                (20.1, "Chorus"),
                (40.1, "Chorus"),
                (62.345, "Third"),
            ]
        );
    }

    #[test]
    fn test_tag_without_fraction() {
        let lyrics = Lyrics::parse("[02:03]Whole seconds");
        assert_eq!(lyrics.get(0).unwrap().time_secs, 123.0);
    }

    #[test]
    fn test_malformed_tags_stay_in_text() {
        let lyrics = Lyrics::parse("[00:01.00]Keep [this] and [1:02.00] too");
        assert_eq!(lyrics.len(), 1);
        assert_eq!(lyrics.get(0).unwrap().text, "Keep [this] and [1:02.00] too");

        // Four fraction digits is not a tag
        assert!(Lyrics::parse("[00:01.0000]x").is_empty());
    }

    #[test]
    fn test_multibyte_text() {
        let lyrics = Lyrics::parse("[00:03.20]夜空 [のうた]");
        assert_eq!(lyrics.get(0).unwrap().text, "夜空 [のうた]");
    }

    #[test]
    fn test_line_at() {
        let lyrics = Lyrics::parse(SONG);
        assert_eq!(lyrics.line_at(0.0), None);
        assert_eq!(lyrics.line_at(4.99), None);
        assert_eq!(lyrics.line_at(5.0), Some(0));
        assert_eq!(lyrics.line_at(12.49), Some(0));
        assert_eq!(lyrics.line_at(25.0), Some(2));
        assert_eq!(lyrics.line_at(500.0), Some(4));
        assert_eq!(Lyrics::default().line_at(10.0), None);
    }
}
