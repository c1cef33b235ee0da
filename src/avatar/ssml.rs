//! SSML rendering for avatar speech

/// Wrap text in an SSML document for a voice
#[must_use]
pub fn render(text: &str, voice: &str, locale: &str) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{}'><voice name='{}'>{}</voice></speak>",
        escape(locale),
        escape(voice),
        escape(text)
    )
}

/// Escape XML special characters
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_text_in_voice() {
        let ssml = render("It is sunny", "en-US-JennyNeural", "en-US");
        assert!(ssml.starts_with("<speak version='1.0'"));
        assert!(ssml.contains("xml:lang='en-US'"));
        assert!(ssml.contains("<voice name='en-US-JennyNeural'>It is sunny</voice>"));
    }

    #[test]
    fn escapes_markup() {
        let ssml = render("Tom & Jerry <3 'quotes'", "v", "en-US");
        assert!(ssml.contains("Tom &amp; Jerry &lt;3 &apos;quotes&apos;"));
        assert!(!ssml.contains("<3"));
    }
}
