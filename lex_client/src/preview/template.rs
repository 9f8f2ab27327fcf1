//! Fixed HTML shell around server-rendered preview bodies.

use lsp_types::Url;

const STYLE: &str = r#"
    :root {
      --lex-fg: #1f2328;
      --lex-bg: #ffffff;
      --lex-muted-bg: #f6f8fa;
      --lex-border: #d0d7de;
      --lex-link: #0969da;
      --lex-error-fg: #82071e;
      --lex-error-bg: #ffebe9;
      --lex-error-border: #ff8182;
    }
    @media (prefers-color-scheme: dark) {
      :root {
        --lex-fg: #e6edf3;
        --lex-bg: #0d1117;
        --lex-muted-bg: #161b22;
        --lex-border: #30363d;
        --lex-link: #4493f8;
        --lex-error-fg: #ffa198;
        --lex-error-bg: #2d1214;
        --lex-error-border: #8e1519;
      }
    }
    body {
      font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Ubuntu, sans-serif;
      line-height: 1.6;
      max-width: 800px;
      margin: 0 auto;
      padding: 20px;
      color: var(--lex-fg);
      background: var(--lex-bg);
    }
    h1, h2, h3, h4, h5, h6 { margin: 1.5em 0 0.5em; }
    pre, code {
      font-family: 'SFMono-Regular', Menlo, Consolas, monospace;
      background: var(--lex-muted-bg);
      border-radius: 3px;
    }
    code { padding: 0.2em 0.4em; }
    pre { padding: 1em; overflow-x: auto; }
    pre code { padding: 0; background: none; }
    blockquote {
      margin: 1em 0;
      padding-left: 1em;
      border-left: 4px solid var(--lex-border);
    }
    a { color: var(--lex-link); }
    table { border-collapse: collapse; margin: 1em 0; }
    th, td { border: 1px solid var(--lex-border); padding: 0.5em 1em; }
    th { background: var(--lex-muted-bg); }
    hr { border: none; border-top: 1px solid var(--lex-border); margin: 2em 0; }
    .error {
      color: var(--lex-error-fg);
      background: var(--lex-error-bg);
      border: 1px solid var(--lex-error-border);
      border-radius: 4px;
      padding: 1em;
    }
"#;

/// Full HTML document around `body`. Scripts and remote resources are
/// blocked by the content security policy; only inline styles load.
pub fn wrap_document(body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <meta http-equiv=\"Content-Security-Policy\" content=\"default-src 'none'; style-src 'unsafe-inline';\">\n\
         <style>{STYLE}</style>\n\
         </head>\n\
         <body>\n\
         {body}\n\
         </body>\n\
         </html>"
    )
}

/// Inline error block shown in place of a failed render.
pub fn error_fragment(message: &str) -> String {
    format!(
        "<div class=\"error\"><strong>Preview Error:</strong> {}</div>",
        escape_html(message)
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `Preview: <file name>`.
pub fn preview_title(document: &Url) -> String {
    let name = document
        .to_file_path()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .or_else(|| {
            document
                .path()
                .rsplit('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| document.as_str().to_string());
    format!("Preview: {name}")
}
