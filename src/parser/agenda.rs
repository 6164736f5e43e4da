use std::sync::LazyLock;

use scraper::{Html, Selector};

static ITEM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").unwrap());

/// Agenda items of a proceeding: one entry per `<li>`, its trimmed text
/// nodes joined by single spaces. Nested items appear both inside their
/// parent and on their own.
pub fn items(agenda_html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(agenda_html);
    fragment
        .select(&ITEM)
        .map(|li| {
            li.text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}
