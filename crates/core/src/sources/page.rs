use crate::chunking::normalize_whitespace;
use scraper::{ElementRef, Html, Selector};

const MAIN_SELECTORS: [&str; 6] = [
    "article",
    "main",
    "[role=\"main\"]",
    ".article-content",
    ".story-body",
    "#content",
];

fn main_content(document: &Html) -> ElementRef<'_> {
    for selector in MAIN_SELECTORS {
        if let Ok(selector) = Selector::parse(selector) {
            if let Some(element) = document.select(&selector).next() {
                return element;
            }
        }
    }
    document.root_element()
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            match child_element.value().name() {
                "script" | "style" | "noscript" | "template" | "nav" | "footer" | "header" | "aside"
                | "form" | "head" => {}
                "br" => out.push(' '),
                "p" | "div" | "section" | "li" | "h1" | "h2" | "h3" | "h4" | "blockquote" => {
                    collect_text(child_element, out);
                    out.push(' ');
                }
                _ => collect_text(child_element, out),
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

/// Readable text of a news page: the article or main region when one
/// exists, without scripts, styles or site chrome.
pub fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();
    collect_text(main_content(&document), &mut text);
    normalize_whitespace(&text).trim().to_string()
}
