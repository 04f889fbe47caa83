use std::path::Path;

use crate::error::ConfigError;

use super::types::Config;

/// Parses a file containing one `curl` invocation into a single-endpoint
/// HTTP config.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file cannot be read or the command
/// has no URL.
pub fn parse_curl_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|err| ConfigError::ReadCurlFile {
        path: path.to_path_buf(),
        source: err,
    })?;
    parse_curl_command(&content)
}

/// Parses a `curl` command line: quoted arguments, backslash-newline
/// continuations, the common subset of flags. Unknown flags are skipped.
///
/// # Errors
///
/// Returns a [`ConfigError`] on unterminated quotes or a missing URL.
pub fn parse_curl_command(command: &str) -> Result<Config, ConfigError> {
    let tokens = tokenize(command)?;
    let mut tokens = tokens.iter().map(String::as_str).peekable();

    if tokens.peek() == Some(&"curl") {
        tokens.next();
    }

    let mut config = Config::default();
    let mut method: Option<String> = None;
    let mut url: Option<String> = None;
    let mut body: Option<String> = None;

    while let Some(token) = tokens.next() {
        match token {
            "-X" | "--request" => {
                if let Some(value) = tokens.next() {
                    method = Some(value.to_uppercase());
                }
            }
            "-H" | "--header" => {
                if let Some(value) = tokens.next() {
                    if let Some((name, header_value)) = value.split_once(':') {
                        config
                            .headers
                            .insert(name.trim().to_owned(), header_value.trim().to_owned());
                    }
                }
            }
            "-d" | "--data" | "--data-raw" | "--data-binary" | "--data-ascii" => {
                if let Some(value) = tokens.next() {
                    body = Some(value.to_owned());
                }
            }
            "--url" => {
                if let Some(value) = tokens.next() {
                    url = Some(value.to_owned());
                }
            }
            "-A" | "--user-agent" => {
                if let Some(value) = tokens.next() {
                    config
                        .headers
                        .insert("User-Agent".to_owned(), value.to_owned());
                }
            }
            "-b" | "--cookie" => {
                if let Some(value) = tokens.next() {
                    config.headers.insert("Cookie".to_owned(), value.to_owned());
                }
            }
            // Flags that take an argument we do not map.
            "-u" | "--user" | "-o" | "--output" | "--connect-timeout" | "--max-time" | "-e"
            | "--referer" => {
                tokens.next();
            }
            token if !token.starts_with('-') && url.is_none() => {
                url = Some(token.to_owned());
            }
            _ => {}
        }
    }

    let url = url.ok_or(ConfigError::CurlMissingUrl)?;
    config.url = Some(url);
    config.body = body.clone().unwrap_or_default();
    config.method = method.unwrap_or_else(|| {
        if body.is_some() {
            "POST".to_owned()
        } else {
            "GET".to_owned()
        }
    });

    Ok(config)
}

fn tokenize(command: &str) -> Result<Vec<String>, ConfigError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut quote: Option<char> = None;
    let mut has_token = false;

    while let Some(ch) = chars.next() {
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                } else if ch == '\\' && open == '"' {
                    match chars.next() {
                        Some(escaped) => current.push(escaped),
                        None => return Err(ConfigError::CurlUnterminatedQuote),
                    }
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    has_token = true;
                }
                '\\' => {
                    // Line continuation; anything else is taken literally.
                    match chars.peek() {
                        Some('\n') => {
                            chars.next();
                        }
                        Some('\r') => {
                            chars.next();
                            if chars.peek() == Some(&'\n') {
                                chars.next();
                            }
                        }
                        _ => {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                                has_token = true;
                            }
                        }
                    }
                }
                ch if ch.is_whitespace() => {
                    if has_token {
                        tokens.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                }
                ch => {
                    current.push(ch);
                    has_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(ConfigError::CurlUnterminatedQuote);
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}
