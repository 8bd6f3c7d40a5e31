//! Filesystem sink of the single-image upload path.
//!
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use unicode_normalization::UnicodeNormalization;

use crate::{frame::Frame, inferer::Detector};

/// Extensions accepted for uploaded images.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Prefix of the annotated output written for an upload.
pub const RESULT_PREFIX: &str = "result_";

/// Whether the filename carries one of the allowed image extensions.
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Reduce a client supplied filename to a safe, flat name.
///
/// The name is decomposed (NFKD) and reduced to ASCII, so accented letters keep their base
/// letter. Path separators become spaces, runs of whitespace are joined with `_`, only ASCII
/// alphanumerics, `.`, `_` and `-` are kept and leading or trailing `.` and `_` are stripped.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename.nfkd().filter(char::is_ascii).collect();
    let flattened = ascii.replace(['/', '\\'], " ");
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_owned()
}

/// Upload and result directories.
#[derive(Debug, Clone)]
pub struct UploadStore {
    upload_dir: PathBuf,
    result_dir: PathBuf,
}

impl UploadStore {
    /// Create the store, creating both directories if missing.
    pub fn new(upload_dir: impl Into<PathBuf>, result_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            upload_dir: upload_dir.into(),
            result_dir: result_dir.into(),
        };
        std::fs::create_dir_all(&store.upload_dir)
            .with_context(|| format!("failed to create {}", store.upload_dir.display()))?;
        std::fs::create_dir_all(&store.result_dir)
            .with_context(|| format!("failed to create {}", store.result_dir.display()))?;

        Ok(store)
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Path of a result file, `None` if the name is not a plain file name.
    pub fn result_path(&self, filename: &str) -> Option<PathBuf> {
        match secure_filename(filename) {
            name if name.is_empty() || name != filename => None,
            name => Some(self.result_dir.join(name)),
        }
    }

    /// Write an uploaded file and return its path.
    pub fn save_upload(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.upload_dir.join(filename);
        std::fs::write(&path, data)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("Saved upload {}", path.display());

        Ok(path)
    }

    /// Run the detector on a saved upload and write the annotated image.
    ///
    /// Returns the file name of the result inside the result directory.
    pub fn detect_file(&self, input: &Path, detector: &dyn Detector) -> Result<String> {
        let filename = input
            .file_name()
            .and_then(|name| name.to_str())
            .context("invalid input file name")?;
        let output_filename = format!("{RESULT_PREFIX}{filename}");
        let output = self.result_dir.join(&output_filename);

        // Content decides the decoder, the extension is only a fallback
        let image = image::io::Reader::open(input)
            .and_then(|reader| reader.with_guessed_format())
            .with_context(|| format!("failed to open {}", input.display()))?
            .decode()
            .with_context(|| format!("failed to read image {}", input.display()))?
            .to_rgb8();
        let annotated = detector.annotate(Frame::from_rgb(image))?.into_rgb()?;
        annotated
            .save(&output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        log::info!("Wrote result {}", output.display());

        Ok(output_filename)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allowed_extensions() {
        assert!(allowed_file("cat.jpg"));
        assert!(allowed_file("cat.JPEG"));
        assert!(allowed_file("archive.tar.png"));
        assert!(!allowed_file("cat.gif"));
        assert!(!allowed_file("jpg"));
        assert!(!allowed_file("cat."));
    }

    #[test]
    fn filenames_are_flattened() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(
            secure_filename("i contain cool \u{fc}ml\u{e4}uts.txt"),
            "i_contain_cool_umlauts.txt"
        );
        assert_eq!(secure_filename("\u{fc}ml\u{e4}uts.png"), "umlauts.png");
        assert_eq!(secure_filename("\u{65e5}\u{672c}.jpg"), "jpg");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn result_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("up"), dir.path().join("res")).unwrap();

        assert!(store.result_path("../secret.png").is_none());
        assert!(store.result_path("").is_none());
        assert_eq!(
            store.result_path("result_cat.png"),
            Some(dir.path().join("res").join("result_cat.png"))
        );
    }

    #[test]
    fn mislabelled_png_is_decoded() {
        struct Passthrough;
        impl Detector for Passthrough {
            fn annotate(&self, frame: Frame) -> Result<Frame, crate::error::DetectionError> {
                Ok(frame)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("up"), dir.path().join("res")).unwrap();
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image::RgbImage::new(2, 2))
            .write_to(&mut png, image::ImageOutputFormat::Png)
            .unwrap();
        let input = store.save_upload("photo.jpg", png.get_ref()).unwrap();

        let output = store.detect_file(&input, &Passthrough).unwrap();

        assert_eq!(output, "result_photo.jpg");
        let written = image::open(store.result_dir().join(&output)).unwrap();
        assert_eq!((written.width(), written.height()), (2, 2));
    }

    #[test]
    fn directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("a/up"), dir.path().join("b/res")).unwrap();

        assert!(store.upload_dir().is_dir());
        assert!(store.result_dir().is_dir());
    }
}
