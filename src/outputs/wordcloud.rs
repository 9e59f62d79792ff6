//! Keyword word clouds from batch summaries.
//!
//! Three steps, each usable on its own:
//!
//! 1. [`clean`] strips markup residue and template labels from the summaries
//! 2. [`word_frequencies`] counts single tokens, ignoring stopwords
//! 3. [`render`] lays the words out on a spiral and writes a PNG
//!
//! Layout keeps an integral image of the occupied area so every candidate
//! position is checked in constant time.

use crate::config::VisualSettings;
use crate::error::VisualError;
use ab_glyph::{FontVec, PxScale};
use chrono::NaiveDate;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*").expect("static regex"));
static DATE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Dátum:\s*\d{4}-\d{2}-\d{2}").expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w[\w']+").expect("static regex"));

const ENGLISH_STOPWORDS: &str = include_str!("stopwords_en.txt");

/// Viridis sampled at nine points, dark to light.
const PALETTE: [[u8; 3]; 9] = [
    [68, 1, 84],
    [72, 40, 120],
    [62, 73, 137],
    [49, 104, 142],
    [38, 130, 142],
    [31, 158, 137],
    [53, 183, 121],
    [109, 205, 89],
    [180, 222, 44],
];

/// Spacing kept free around every word, in pixels.
const MARGIN: u32 = 2;
/// How much the font shrinks each time a word does not fit.
const FONT_STEP: f32 = 2.0;

/// Joins summaries into one normalized string for keyword counting.
///
/// Removes `**`, line breaks, `Dátum: YYYY-MM-DD` labels and every phrase in
/// `labels`, then collapses whitespace. Applying it twice changes nothing.
pub fn clean<S: AsRef<str>>(summaries: &[S], labels: &[String]) -> String {
    let joined = summaries
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ");
    let mut text = BOLD.replace_all(&joined, "").replace('\n', " ");
    text = DATE_LABEL.replace_all(&text, "").into_owned();
    for label in labels {
        text = text.replace(label.as_str(), "");
    }
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Built-in English stopwords together with `extra`, lower-cased.
pub fn stopword_set(extra: HashSet<String>) -> HashSet<String> {
    let mut set: HashSet<String> = ENGLISH_STOPWORDS
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    set.extend(extra.into_iter().map(|w| w.to_lowercase()));
    set
}

/// Counts single-token keywords, most frequent first.
///
/// Tokens are matched case-insensitively and reported in their most common
/// spelling. A trailing `'s` is dropped, and purely numeric tokens and
/// stopwords are skipped. Ties are ordered alphabetically.
pub fn word_frequencies(text: &str, stopwords: &HashSet<String>) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut spellings: HashMap<String, Vec<(String, usize)>> = HashMap::new();

    for m in TOKEN.find_iter(text) {
        let mut word = m.as_str();
        if word.to_lowercase().ends_with("'s") {
            word = &word[..word.len() - 2];
        }
        if word.chars().count() < 2 || word.chars().all(char::is_numeric) {
            continue;
        }
        let key = word.to_lowercase();
        if stopwords.contains(&key) {
            continue;
        }

        *counts.entry(key.clone()).or_default() += 1;
        let forms = spellings.entry(key).or_default();
        match forms.iter_mut().find(|(f, _)| f == word) {
            Some((_, n)) => *n += 1,
            None => forms.push((word.to_string(), 1)),
        }
    }

    let mut out: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(key, n)| {
            let display = spellings
                .get(&key)
                .and_then(|forms| forms.iter().rev().max_by_key(|(_, c)| *c))
                .map(|(f, _)| f.clone())
                .unwrap_or(key);
            (display, n)
        })
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

/// Deterministic output path for a topic's image on a given day.
pub fn image_path(output_dir: &Path, topic_id: &str, date: NaiveDate) -> PathBuf {
    output_dir.join(format!("wordcloud_{}_{}.png", topic_id, date.format("%Y-%m-%d")))
}

/// One word positioned on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub word: String,
    pub font_size: f32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub color: Rgb<u8>,
}

/// Summed-area table over occupied pixels.
struct Occupancy {
    width: u32,
    height: u32,
    cells: Vec<bool>,
    integral: Vec<u32>,
}

impl Occupancy {
    fn new(width: u32, height: u32) -> Self {
        let n = (width as usize) * (height as usize);
        Self {
            width,
            height,
            cells: vec![false; n],
            integral: vec![0; (width as usize + 1) * (height as usize + 1)],
        }
    }

    fn idx(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize + 1) + x as usize
    }

    /// `true` if no occupied pixel falls inside the rectangle.
    fn is_free(&self, x: u32, y: u32, w: u32, h: u32) -> bool {
        if x + w > self.width || y + h > self.height {
            return false;
        }
        let a = self.integral[self.idx(x, y)];
        let b = self.integral[self.idx(x + w, y)];
        let c = self.integral[self.idx(x, y + h)];
        let d = self.integral[self.idx(x + w, y + h)];
        d + a == b + c
    }

    fn occupy(&mut self, x: u32, y: u32, w: u32, h: u32) {
        let x1 = (x + w).min(self.width);
        let y1 = (y + h).min(self.height);
        for yy in y..y1 {
            for xx in x..x1 {
                self.cells[(yy as usize) * (self.width as usize) + xx as usize] = true;
            }
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let w = self.width as usize;
        for y in 0..self.height as usize {
            let mut row = 0u32;
            for x in 0..w {
                row += u32::from(self.cells[y * w + x]);
                let above = self.integral[y * (w + 1) + x + 1];
                self.integral[(y + 1) * (w + 1) + x + 1] = above + row;
            }
        }
    }
}

/// Walks an Archimedean spiral outward from the canvas centre looking for a
/// free `w × h` box.
fn find_spot(occ: &Occupancy, w: u32, h: u32) -> Option<(u32, u32)> {
    if w > occ.width || h > occ.height {
        return None;
    }
    let cx = f64::from(occ.width) / 2.0;
    let cy = f64::from(occ.height) / 2.0;
    let max_r = (cx * cx + cy * cy).sqrt();
    let mut theta = 0.0f64;

    loop {
        let r = 1.5 * theta;
        if r > max_r {
            return None;
        }
        let x = cx + r * theta.cos() - f64::from(w) / 2.0;
        let y = cy + r * theta.sin() - f64::from(h) / 2.0;
        if x >= 0.0 && y >= 0.0 {
            let (x, y) = (x as u32, y as u32);
            if occ.is_free(x, y, w, h) {
                return Some((x, y));
            }
        }
        // keep the arc step near 4px once the spiral has opened up
        theta += (4.0 / r.max(4.0)).min(0.5);
    }
}

/// Positions up to `max_words` words, largest first.
///
/// `measure` returns the pixel size of a word at a font size. Words that do
/// not fit even at `min_font_size` are left out.
pub fn layout<F>(
    frequencies: &[(String, usize)],
    settings: &VisualSettings,
    measure: F,
) -> Vec<Placement>
where
    F: Fn(&str, f32) -> (u32, u32),
{
    let Some(max_count) = frequencies.first().map(|(_, n)| *n as f32) else {
        return Vec::new();
    };
    let mut occ = Occupancy::new(settings.width, settings.height);
    let mut placed = Vec::new();

    for (rank, (word, count)) in frequencies.iter().take(settings.max_words).enumerate() {
        let relative = *count as f32 / max_count;
        let mut size = (settings.max_font_size * (0.5 * relative + 0.5)).max(settings.min_font_size);

        while size >= settings.min_font_size {
            let (w, h) = measure(word, size);
            let (bw, bh) = (w + 2 * MARGIN, h + 2 * MARGIN);
            if let Some((x, y)) = find_spot(&occ, bw, bh) {
                occ.occupy(x, y, bw, bh);
                let [r, g, b] = PALETTE[rank % PALETTE.len()];
                placed.push(Placement {
                    word: word.clone(),
                    font_size: size,
                    x: x + MARGIN,
                    y: y + MARGIN,
                    width: w,
                    height: h,
                    color: Rgb([r, g, b]),
                });
                break;
            }
            size -= FONT_STEP;
        }
        if size < settings.min_font_size {
            debug!(%word, "No room left for word");
        }
    }
    placed
}

fn load_font(path: &Path) -> Result<FontVec, VisualError> {
    let bytes = std::fs::read(path).map_err(|e| VisualError::Font {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    FontVec::try_from_vec(bytes).map_err(|e| VisualError::Font {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Writes a keyword image for a frequency table.
pub trait ImageRenderer {
    fn render(&self, frequencies: &[(String, usize)], path: &Path) -> Result<PathBuf, VisualError>;
}

/// The PNG word cloud renderer. The font is loaded once, up front.
pub struct WordCloud {
    settings: VisualSettings,
    font: FontVec,
}

impl WordCloud {
    pub fn new(settings: VisualSettings) -> Result<Self, VisualError> {
        let font = load_font(&settings.font_path)?;
        Ok(Self { settings, font })
    }
}

impl ImageRenderer for WordCloud {
    fn render(&self, frequencies: &[(String, usize)], path: &Path) -> Result<PathBuf, VisualError> {
        render(frequencies, &self.settings, &self.font, path)
    }
}

/// Draws `frequencies` as a word cloud and writes it to `path` as PNG.
#[instrument(level = "info", skip_all, fields(path = %path.display(), words = frequencies.len()))]
pub fn render(
    frequencies: &[(String, usize)],
    settings: &VisualSettings,
    font: &FontVec,
    path: &Path,
) -> Result<PathBuf, VisualError> {
    if frequencies.is_empty() {
        return Err(VisualError::NoWords);
    }

    let placements = layout(frequencies, settings, |word, size| {
        text_size(PxScale::from(size), font, word)
    });

    let mut canvas = RgbImage::from_pixel(settings.width, settings.height, Rgb([255, 255, 255]));
    for p in &placements {
        draw_text_mut(
            &mut canvas,
            p.color,
            p.x as i32,
            p.y as i32,
            PxScale::from(p.font_size),
            font,
            &p.word,
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    canvas.save(path).map_err(|source| VisualError::Image {
        path: path.display().to_string(),
        source,
    })?;
    info!(placed = placements.len(), "Wrote word cloud");
    Ok(path.to_path_buf())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        VisualSettings::default().label_phrases
    }

    fn small_canvas() -> VisualSettings {
        VisualSettings {
            width: 200,
            height: 120,
            max_words: 50,
            min_font_size: 8.0,
            max_font_size: 40.0,
            ..Default::default()
        }
    }

    /// Width proportional to length, height to font size.
    fn mono(word: &str, size: f32) -> (u32, u32) {
        let w = (word.chars().count() as f32 * size * 0.6).ceil() as u32;
        (w.max(1), size.ceil() as u32)
    }

    #[test]
    fn test_clean_removes_markup_and_labels() {
        let summaries = vec![
            "**Dátum: 2025-06-10**\nFő gazdasági esemény: Kamatdöntés".to_string(),
            "Rövid leírás:   A  jegybank\n\ndöntött.  Összefoglalás: vége".to_string(),
        ];
        assert_eq!(
            clean(&summaries, &labels()),
            "Kamatdöntés A jegybank döntött. vége"
        );
    }

    #[test]
    fn test_clean_is_idempotent() {
        let once = clean(&["**Érintett szektor(ok):** bank,  ipar\n\nEnergia"], &labels());
        assert_eq!(once, "bank, ipar Energia");
        assert_eq!(clean(&[once.as_str()], &labels()), once);
    }

    #[test]
    fn test_frequencies_exclude_stopwords() {
        let stop: HashSet<String> = ["the".to_string()].into_iter().collect();
        let freq = word_frequencies("the cat the dog", &stop);
        assert_eq!(freq, vec![("cat".to_string(), 1), ("dog".to_string(), 1)]);
    }

    #[test]
    fn test_frequencies_fold_case_and_possessives() {
        let stop = HashSet::new();
        let freq = word_frequencies("Budapest budapest Budapest's 2025 x Orbán", &stop);
        assert_eq!(
            freq,
            vec![("Budapest".to_string(), 3), ("Orbán".to_string(), 1)]
        );
    }

    #[test]
    fn test_stopword_set_merges_lists() {
        let extra: HashSet<String> = ["Hogy".to_string()].into_iter().collect();
        let set = stopword_set(extra);
        assert!(set.contains("the"));
        assert!(set.contains("hogy"));
        let freq = word_frequencies("The kormány hogy the kormány", &set);
        assert_eq!(freq, vec![("kormány".to_string(), 2)]);
    }

    #[test]
    fn test_image_path_is_deterministic() {
        let d = NaiveDate::from_ymd_opt(2025, 6, 12).unwrap();
        assert_eq!(
            image_path(Path::new("/tmp/out"), "kulfold", d),
            PathBuf::from("/tmp/out/wordcloud_kulfold_2025-06-12.png")
        );
    }

    #[test]
    fn test_layout_has_no_overlaps() {
        let freq: Vec<(String, usize)> = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"]
            .iter()
            .enumerate()
            .map(|(i, w)| (w.to_string(), 6 - i))
            .collect();
        let settings = small_canvas();
        let placed = layout(&freq, &settings, mono);

        assert!(!placed.is_empty());
        assert_eq!(placed[0].word, "alpha");
        assert_eq!(placed[0].font_size, 40.0);
        for p in &placed {
            assert!(p.x + p.width <= settings.width);
            assert!(p.y + p.height <= settings.height);
        }
        for (i, a) in placed.iter().enumerate() {
            for b in &placed[i + 1..] {
                let apart = a.x + a.width <= b.x
                    || b.x + b.width <= a.x
                    || a.y + a.height <= b.y
                    || b.y + b.height <= a.y;
                assert!(apart, "{} overlaps {}", a.word, b.word);
            }
        }
    }

    #[test]
    fn test_layout_drops_words_that_never_fit() {
        let freq = vec![("x".repeat(100), 1)];
        assert!(layout(&freq, &small_canvas(), mono).is_empty());
    }

    #[test]
    fn test_layout_respects_max_words() {
        let freq: Vec<(String, usize)> = (0..20).map(|i| (format!("w{i}"), 1)).collect();
        let settings = VisualSettings {
            max_words: 3,
            ..small_canvas()
        };
        assert!(layout(&freq, &settings, mono).len() <= 3);
    }

    #[test]
    fn test_missing_font_is_reported_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let settings = VisualSettings {
            font_path: dir.path().join("missing.ttf"),
            ..small_canvas()
        };
        let err = WordCloud::new(settings).err().unwrap();
        assert!(matches!(err, VisualError::Font { .. }));
    }

    #[test]
    fn test_garbage_font_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let font_path = dir.path().join("broken.ttf");
        std::fs::write(&font_path, b"not a font").unwrap();
        let settings = VisualSettings {
            font_path,
            ..small_canvas()
        };
        assert!(matches!(
            WordCloud::new(settings).err().unwrap(),
            VisualError::Font { .. }
        ));
    }
}
