use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::normalize_ws;

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static CONTEXT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.punkt-tytul").unwrap());
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());

/// The three projections taken from one statement document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechFields {
    pub title: String,
    pub context: String,
    pub text: String,
}

pub fn extract(html: &str) -> SpeechFields {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    // Topic paragraph; absent on many statements.
    let context = doc
        .select(&CONTEXT)
        .next()
        .map(|p| normalize_ws(&element_text(p)))
        .unwrap_or_default();

    let text = doc
        .select(&PARAGRAPH)
        .filter(|p| is_unmarked(p))
        .map(|p| normalize_ws(&element_text(p)))
        .collect::<Vec<_>>()
        .join(" ");

    SpeechFields { title, context, text }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

fn is_unmarked(p: &ElementRef<'_>) -> bool {
    p.value().attr("class").map_or(true, |c| c.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<!DOCTYPE html>
<html><head><title> Wypowiedź posła </title></head>
<body>
  <h2 class="mowca">Poseł Jan Kowalski</h2>
  <p class="punkt-tytul">Temat:
     X</p>
  <p>Foo.</p>
  <p class="uwaga">(Oklaski)</p>
  <p>  Bar.  </p>
</body></html>"#;

    #[test]
    fn context_and_body_text() {
        let f = extract(FIXTURE);
        assert_eq!(f.title, "Wypowiedź posła");
        assert_eq!(f.context, "Temat: X");
        assert_eq!(f.text, "Foo. Bar.");
    }

    #[test]
    fn missing_markers_degrade_to_empty() {
        let f = extract("<html><body><p>Only <b>body</b>\n text.</p></body></html>");
        assert_eq!(f.title, "");
        assert_eq!(f.context, "");
        assert_eq!(f.text, "Only body text.");
    }

    #[test]
    fn empty_class_counts_as_unmarked() {
        let f = extract(r#"<p class="">One.</p><p class=" ">Two.</p><p class="x">No.</p>"#);
        assert_eq!(f.text, "One. Two.");
    }

    #[test]
    fn empty_paragraphs_still_take_a_slot() {
        let f = extract("<p>Foo.</p><p>  </p><p>Bar.</p>");
        assert_eq!(f.text, "Foo.  Bar.");
    }

    #[test]
    fn only_first_context_paragraph_is_used() {
        let f = extract(r#"<p class="punkt-tytul">First</p><p class="punkt-tytul">Second</p>"#);
        assert_eq!(f.context, "First");
        assert_eq!(f.text, "");
    }

    #[test]
    fn empty_document() {
        assert_eq!(extract(""), SpeechFields::default());
    }
}
