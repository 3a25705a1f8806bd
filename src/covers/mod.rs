//! Cover art fetching from Open Library.
//!
//! For each catalog row: search Open Library by title, walk the first few
//! ISBN candidates to the covers endpoint, resize whatever comes back to
//! 300×430 JPEG, and fall back to a generated placeholder. Already-present
//! files are skipped so the command can resume after interruption. At the
//! end an augmented CSV (`id,title,author,description,genres,cover`) is
//! written next to the input.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

pub const COVER_WIDTH: u32 = 300;
pub const COVER_HEIGHT: u32 = 430;
pub const JPEG_QUALITY: u8 = 85;
pub const PLACEHOLDER_NAME: &str = "placeholder.jpg";

const MAX_ISBN_CANDIDATES: usize = 3;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CoverFetchOptions {
    pub catalog_path: PathBuf,
    /// Covers land in `static_dir/covers/`.
    pub static_dir: PathBuf,
    /// Augmented catalog written here.
    pub output_csv: PathBuf,
    /// Pause between Open Library requests.
    pub delay: Duration,
    pub search_base: String,
    pub covers_base: String,
}

impl Default for CoverFetchOptions {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("books.csv"),
            static_dir: PathBuf::from("static"),
            output_csv: PathBuf::from("books_with_covers.csv"),
            delay: Duration::from_millis(250),
            search_base: "https://openlibrary.org".to_string(),
            covers_base: "https://covers.openlibrary.org".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoverReport {
    pub fetched: usize,
    pub placeholders: usize,
    pub skipped: usize,
}

static SLUG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static SLUG_JOIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_-]+").expect("valid regex"));

/// Filesystem-safe slug: lowercase, punctuation stripped, runs of
/// whitespace/underscores/dashes collapsed to single underscores.
pub fn slugify(input: &str) -> String {
    let lowered = input.to_lowercase();
    let stripped = SLUG_STRIP.replace_all(lowered.trim(), "");
    let joined = SLUG_JOIN.replace_all(&stripped, "_");
    let slug = joined.trim_matches('_').to_string();
    if slug.is_empty() {
        "book".to_string()
    } else {
        slug
    }
}

/// Fetch covers for every book in the catalog.
pub fn fetch_covers(opts: &CoverFetchOptions) -> Result<CoverReport> {
    let books = crate::catalog::loader::read_catalog_csv(&opts.catalog_path, None)
        .with_context(|| format!("read catalog {}", opts.catalog_path.display()))?;

    let covers_dir = opts.static_dir.join("covers");
    std::fs::create_dir_all(&covers_dir)
        .with_context(|| format!("create covers dir {}", covers_dir.display()))?;
    ensure_placeholder(&covers_dir)?;

    let client = OpenLibraryClient::new(&opts.search_base, &opts.covers_base)?;

    let bar = ProgressBar::new(books.len() as u64).with_style(
        ProgressStyle::with_template("{msg:<32} {pos}/{len} [{bar:30}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut report = CoverReport::default();
    let mut rows = Vec::with_capacity(books.len());

    for book in &books {
        bar.set_message(book.title.clone());

        let slug: String = slugify(&book.title).chars().take(40).collect();
        let file_name = format!("{}_{slug}.jpg", book.id);
        let out_path = covers_dir.join(&file_name);

        let cover_url = if out_path.exists() {
            debug!(id = book.id, file = %file_name, "cover_exists");
            report.skipped += 1;
            format!("/static/covers/{file_name}")
        } else {
            match client.fetch_cover_by_title(&book.title) {
                Ok(Some(img)) => {
                    save_cover(&img, &out_path)
                        .with_context(|| format!("save cover {}", out_path.display()))?;
                    report.fetched += 1;
                    format!("/static/covers/{file_name}")
                }
                Ok(None) => {
                    report.placeholders += 1;
                    format!("/static/covers/{PLACEHOLDER_NAME}")
                }
                Err(err) => {
                    warn!(id = book.id, title = %book.title, error = %err, "cover_fetch_failed");
                    report.placeholders += 1;
                    format!("/static/covers/{PLACEHOLDER_NAME}")
                }
            }
        };

        rows.push((book.clone(), cover_url));
        bar.inc(1);
        std::thread::sleep(opts.delay);
    }
    bar.finish_and_clear();

    write_augmented_csv(&opts.output_csv, &rows)?;
    info!(
        fetched = report.fetched,
        placeholders = report.placeholders,
        skipped = report.skipped,
        output = %opts.output_csv.display(),
        "covers_done"
    );
    Ok(report)
}

/// Generate the flat placeholder cover once.
pub fn ensure_placeholder(covers_dir: &Path) -> Result<()> {
    let path = covers_dir.join(PLACEHOLDER_NAME);
    if path.exists() {
        return Ok(());
    }
    let img: RgbImage =
        ImageBuffer::from_pixel(COVER_WIDTH, COVER_HEIGHT, Rgb([30u8, 40u8, 50u8]));
    save_cover(&DynamicImage::ImageRgb8(img), &path)
}

fn save_cover(img: &DynamicImage, path: &Path) -> Result<()> {
    // Aspect-preserving shrink into the cover box, then JPEG at fixed quality.
    let resized = img.thumbnail(COVER_WIDTH, COVER_HEIGHT);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;
    Ok(())
}

fn write_augmented_csv(path: &Path, rows: &[(crate::catalog::Book, String)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("create augmented csv {}", path.display()))?;
    writer.write_record(["id", "title", "author", "description", "genres", "cover"])?;
    for (book, cover) in rows {
        writer.write_record([
            &book.id.to_string(),
            &book.title,
            &book.author,
            &book.description,
            &book.genres.join(", "),
            cover,
        ])?;
    }
    writer.flush()?;
    Ok(())
}

struct OpenLibraryClient {
    client: reqwest::blocking::Client,
    search_base: String,
    covers_base: String,
}

impl OpenLibraryClient {
    fn new(search_base: &str, covers_base: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            search_base: search_base.trim_end_matches('/').to_string(),
            covers_base: covers_base.trim_end_matches('/').to_string(),
        })
    }

    /// Search by title and try the first few ISBNs until one has a cover.
    fn fetch_cover_by_title(&self, title: &str) -> Result<Option<DynamicImage>> {
        if title.is_empty() {
            return Ok(None);
        }
        let url = format!("{}/search.json", self.search_base);
        let response = self
            .client
            .get(&url)
            .query(&[("title", title)])
            .send()?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let body: serde_json::Value = response.json()?;
        let docs = body["docs"].as_array().cloned().unwrap_or_default();

        for doc in &docs {
            let isbns = doc["isbn"].as_array().cloned().unwrap_or_default();
            for isbn in isbns.iter().take(MAX_ISBN_CANDIDATES) {
                if let Some(isbn) = isbn.as_str() {
                    if let Some(img) = self.fetch_cover_by_isbn(isbn)? {
                        return Ok(Some(img));
                    }
                }
            }
        }
        Ok(None)
    }

    fn fetch_cover_by_isbn(&self, isbn: &str) -> Result<Option<DynamicImage>> {
        if isbn.is_empty() {
            return Ok(None);
        }
        let url = format!(
            "{}/b/isbn/{}-L.jpg",
            self.covers_base,
            urlencoding::encode(isbn)
        );
        let response = self.client.get(&url).send()?;
        let is_image = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("image"));
        if !response.status().is_success() || !is_image {
            return Ok(None);
        }
        let bytes = response.bytes()?;
        match image::load_from_memory(&bytes) {
            Ok(img) => Ok(Some(img)),
            Err(err) => {
                debug!(isbn, error = %err, "cover_decode_failed");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn slugify_strips_and_joins() {
        assert_eq!(slugify("The Hobbit"), "the_hobbit");
        assert_eq!(slugify("Harry Potter & the Sorcerer's Stone!"), "harry_potter_the_sorcerers_stone");
        assert_eq!(slugify("  ---  "), "book");
        assert_eq!(slugify("1984"), "1984");
    }

    #[test]
    fn placeholder_is_written_once() {
        let tmp = tempdir().unwrap();
        ensure_placeholder(tmp.path()).unwrap();
        let path = tmp.path().join(PLACEHOLDER_NAME);
        assert!(path.is_file());
        let first = std::fs::metadata(&path).unwrap().len();

        ensure_placeholder(tmp.path()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), first);

        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), COVER_WIDTH);
        assert_eq!(img.height(), COVER_HEIGHT);
    }

    #[test]
    fn save_cover_shrinks_oversized_images() {
        let tmp = tempdir().unwrap();
        let big: RgbImage = ImageBuffer::from_pixel(900, 1290, Rgb([200u8, 10u8, 10u8]));
        let path = tmp.path().join("cover.jpg");
        save_cover(&DynamicImage::ImageRgb8(big), &path).unwrap();

        let saved = image::open(&path).unwrap();
        assert!(saved.width() <= COVER_WIDTH);
        assert!(saved.height() <= COVER_HEIGHT);
    }
}
