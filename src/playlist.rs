use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Ordered content URLs with a current position that wraps in both directions.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Playlist {
    entries: Vec<String>,
    index: usize,
}

impl Playlist {
    pub fn new(entries: Vec<String>) -> Playlist {
        Playlist {
            entries,
            index: 0,
        }
    }

    /// Entries of a playlist file: one per line, trimmed, blank lines skipped.
    pub fn load_file(path: &Path) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Playlist::load_file: reading {path:?}"))?;

        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Replace the entries and move to the first one.
    pub fn set(&mut self, entries: Vec<String>) {
        self.entries = entries;
        self.index = 0;
    }

    /// Append entries and move to the first one.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = String>) {
        self.entries.extend(entries);
        self.index = 0;
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry at the current position. Fails when empty or out of range.
    pub fn current(&self) -> Result<&str> {
        self.verify()?;
        Ok(&self.entries[self.index])
    }

    /// Move forward one entry, wrapping to the first, and return the new current entry.
    pub fn advance(&mut self) -> Result<&str> {
        self.verify()?;
        self.index = (self.index + 1) % self.entries.len();
        self.current()
    }

    /// Move back one entry, wrapping to the last, and return the new current entry.
    pub fn retreat(&mut self) -> Result<&str> {
        self.verify()?;
        self.index = match self.index {
            0 => self.entries.len() - 1,
            i => i - 1,
        };
        self.current()
    }

    /// Move to `index` without loading anything.
    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.entries.len() {
            bail!("Playlist::select: index out of range\n\
                   _ index = {index}\n\
                   _ len   = {len}",
                  len = self.entries.len());
        }
        self.index = index;
        Ok(())
    }

    fn verify(&self) -> Result<()> {
        if self.entries.is_empty() {
            bail!("Playlist error: playlist is empty");
        }
        if self.index >= self.entries.len() {
            bail!("Playlist error: index out of range\n\
                   _ index = {index}\n\
                   _ len   = {len}",
                  index = self.index,
                  len = self.entries.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn three() -> Playlist {
        Playlist::new(vec!["a".into(), "b".into(), "c".into()])
    }

    #[test]
    fn advance_wraps_to_first() -> Result<()> {
        let mut pl = three();
        pl.select(2)?;
        assert_eq!(pl.advance()?, "a");
        assert_eq!(pl.index(), 0);
        Ok(())
    }

    #[test]
    fn retreat_wraps_to_last() -> Result<()> {
        let mut pl = three();
        assert_eq!(pl.retreat()?, "c");
        assert_eq!(pl.index(), 2);
        assert_eq!(pl.retreat()?, "b");
        Ok(())
    }

    #[test]
    fn empty_playlist_errors_and_stays_put() {
        let mut pl = Playlist::default();
        assert!(pl.current().is_err());
        assert!(pl.advance().is_err());
        assert!(pl.retreat().is_err());
        assert_eq!(pl.index(), 0);
        assert!(pl.select(0).is_err());
    }

    #[test]
    fn parse_trims_and_skips_blank_lines() {
        let text = "  http://h/a.mp3 \n\n\t\nhttp://h/b.mp4\r\n   \n";
        assert_eq!(Playlist::parse(text), vec!["http://h/a.mp3", "http://h/b.mp4"]);
    }

    #[test]
    fn extend_appends_and_rewinds() -> Result<()> {
        let mut pl = three();
        pl.select(1)?;
        pl.extend(["d".to_string()]);
        assert_eq!(pl.len(), 4);
        assert_eq!(pl.current()?, "a");
        Ok(())
    }

    #[test]
    fn load_file_missing_is_error() {
        assert!(Playlist::load_file(Path::new("/nonexistent/playlist.txt")).is_err());
    }
}
