//! In-process text extraction for HTML documents.

/// Elements whose content is never document text.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Concatenate the text nodes of an HTML document.
///
/// Tags, comments and declarations are dropped. Character references are
/// decoded. Content of `script` and `style` elements is skipped.
pub fn strip_markup(markup: &str) -> String {
    let mut text = String::with_capacity(markup.len() / 2);
    let mut rest = markup;

    while let Some(open) = rest.find('<') {
        push_decoded(&mut text, &rest[..open]);
        rest = &rest[open..];

        if let Some(after) = rest.strip_prefix("<!--") {
            rest = match after.find("-->") {
                Some(end) => &after[end + 3..],
                None => "",
            };
            continue;
        }

        let starts_tag = rest[1..]
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
            .unwrap_or(false);
        if !starts_tag {
            text.push('<');
            rest = &rest[1..];
            continue;
        }

        let Some(close) = rest.find('>') else {
            rest = "";
            break;
        };
        let tag = &rest[1..close];
        rest = &rest[close + 1..];

        let name = tag_name(tag).to_ascii_lowercase();
        let is_opening = !tag.starts_with('/') && !tag.ends_with('/');
        if is_opening && RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            let needle = format!("</{}", name);
            // ASCII lowercasing keeps byte offsets stable
            rest = match rest.to_ascii_lowercase().find(&needle) {
                Some(end) => &rest[end..],
                None => "",
            };
        }
    }

    push_decoded(&mut text, rest);
    text
}

fn tag_name(tag: &str) -> &str {
    let tag = tag.trim_start_matches('/');
    let end = tag
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(tag.len());
    &tag[..end]
}

fn push_decoded(out: &mut String, raw: &str) {
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match decode_reference(rest) {
            Some((decoded, consumed)) => {
                out.push(decoded);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
}

/// Decode a character reference at the start of `s`, returning the
/// character and the number of bytes consumed.
fn decode_reference(s: &str) -> Option<(char, usize)> {
    let semi = s
        .char_indices()
        .take(12)
        .find(|(_, c)| *c == ';')
        .map(|(i, _)| i)?;
    let body = &s[1..semi];
    let decoded = if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        char::from_u32(code)?
    } else {
        match body {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            "nbsp" => '\u{a0}',
            _ => return None,
        }
    };
    Some((decoded, semi + 1))
}
