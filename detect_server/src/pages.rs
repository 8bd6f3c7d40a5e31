//! HTML pages served by the endpoints.
//!
pub const INDEX: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <title>Object Detection</title>
</head>
<body>
  <h1>Object Detection</h1>
  <form method="post" enctype="multipart/form-data">
    <input type="file" name="file" accept=".jpg,.jpeg,.png" required />
    <button type="submit">Upload Image &amp; Detect</button>
  </form>
  <p><a href="/camera">Start Real-Time Camera Detection</a></p>
</body>
</html>
"#;

pub const CAMERA: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <title>Live Camera Detection</title>
</head>
<body>
  <h1>Live Detection</h1>
  <img src="/video_feed" alt="Live Camera Feed" />
  <p>
    <a href="/stop_camera">Stop Camera</a>
    <a href="/">Back to Home</a>
  </p>
</body>
</html>
"#;

/// Result page showing an annotated upload.
///
/// `filename` must already be a sanitized file name.
pub fn result(filename: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <title>Detection Result</title>
</head>
<body>
  <h1>Detection Result</h1>
  <img src="/static/results/{filename}" alt="Detected Image" />
  <p><a href="/">Back to Home</a></p>
</body>
</html>
"#
    )
}

pub fn invalid_format() -> String {
    "<h3>Invalid file format. Only JPG, JPEG, PNG allowed.</h3><a href='/'>Back</a>".into()
}

pub fn detection_error(message: &str) -> String {
    format!(
        "<h3>Error during detection: {}</h3><a href='/'>Try Again</a>",
        escape(message)
    )
}

fn escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_owned(),
            '>' => "&gt;".to_owned(),
            '&' => "&amp;".to_owned(),
            '"' => "&quot;".to_owned(),
            '\'' => "&#39;".to_owned(),
            c => c.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detection_errors_are_escaped() {
        assert_eq!(
            detection_error("<bad> & 'worse'"),
            "<h3>Error during detection: &lt;bad&gt; &amp; &#39;worse&#39;</h3><a href='/'>Try Again</a>"
        );
    }

    #[test]
    fn result_page_references_image() {
        assert!(result("result_cat.png").contains(r#"src="/static/results/result_cat.png""#));
    }
}
