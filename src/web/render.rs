use std::fmt::Write;

use crate::error::QueryError;

/// One ranked match, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMatch {
    pub identity: String,
    pub similarity: f32,
    pub similarity_percent: String,
    pub image_url: String,
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode each `/`-separated segment of a relative path.
pub fn url_path(rel: &str) -> String {
    rel.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n<style>\n\
         body {{ font-family: sans-serif; max-width: 960px; margin: 2em auto; }}\n\
         .error {{ color: #b00020; }}\n\
         .matches {{ display: flex; flex-wrap: wrap; gap: 1em; }}\n\
         .match img, .upload img {{ max-width: 200px; max-height: 200px; }}\n\
         </style>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape(title),
        body
    )
}

const FORM: &str = "<form method=\"post\" action=\"/\" enctype=\"multipart/form-data\">\n\
                    <input type=\"file\" name=\"image\" accept=\"image/*\">\n\
                    <button type=\"submit\">Find matches</button>\n</form>\n";

pub fn index_page(error: Option<&str>) -> String {
    let mut body = String::from("<h1>Face Match</h1>\n");
    if let Some(error) = error {
        let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(error));
    }
    body.push_str(FORM);
    page("Face Match", &body)
}

pub fn result_page(uploaded: Option<&str>, result: &Result<Vec<RenderedMatch>, QueryError>) -> String {
    let mut body = String::from("<h1>Results</h1>\n");

    if let Some(name) = uploaded {
        let _ = writeln!(
            body,
            "<div class=\"upload\"><h2>Uploaded image</h2><img src=\"/static/uploads/{}\" alt=\"{}\"></div>",
            escape(&url_path(name)),
            escape(name)
        );
    }

    match result {
        Err(e) => {
            let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(&e.to_string()));
        }
        Ok(matches) if matches.is_empty() => {
            body.push_str("<p>No known faces to compare against.</p>\n");
        }
        Ok(matches) => {
            body.push_str("<h2>Top matches</h2>\n<div class=\"matches\">\n");
            for (rank, m) in matches.iter().enumerate() {
                let _ = writeln!(
                    body,
                    "<div class=\"match\"><img src=\"{}\" alt=\"{}\">\
                     <p>#{} <strong>{}</strong> <span class=\"similarity\">{}</span></p></div>",
                    escape(&m.image_url),
                    escape(&m.identity),
                    rank + 1,
                    escape(&m.identity),
                    escape(&m.similarity_percent)
                );
            }
            body.push_str("</div>\n");
        }
    }

    body.push_str("<p><a href=\"/\">Try another image</a></p>\n");
    page("Face Match results", &body)
}
