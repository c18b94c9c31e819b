/*!
 * Canned translations and sample content for mock providers
 */

use once_cell::sync::Lazy;
use regex::Regex;

static SRC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src="([^"]*)""#).unwrap());

/// Word-level English to French mapping; keeps markup and placeholders as they are
pub fn to_french(text: &str) -> String {
    text.replace("Hammock collection", "Collection de hamacs")
        .replace("Our hammock", "Notre hamac")
        .replace("The hammock", "Le hamac")
        .replace("hammock", "hamac")
        .replace("between two trees", "entre deux arbres")
        .replace("for easy travel", "pour voyager facilement")
        .replace("Waterproof", "Imperméable")
        .replace("About us", "À propos")
}

/// Chinese reply for the hammock tarp title: only the product noun stays English
pub fn hammock_title_zh(_text: &str) -> String {
    "防水Hammock天幕".to_string()
}

/// Roughly 5,000 characters of product HTML with one video embed and three images
pub fn long_product_html() -> String {
    let paragraph = "<p>Our hammock is woven from soft recycled cotton and hangs comfortably between two trees. \
The hammock carries up to two adults and folds into its own pocket for easy travel.</p>\n";
    let mut html = String::from("<h2>Hammock collection</h2>\n");
    html.push_str(
        "<div class=\"video-wrapper\"><iframe width=\"560\" height=\"315\" \
src=\"https://www.youtube.com/embed/Xk3vQ9pL2aE?rel=0&amp;start=12\" allowfullscreen></iframe></div>\n",
    );

    let mut images = 0;
    let mut index = 0;
    while html.len() < 4_800 || images < 3 {
        if index % 6 == 3 && images < 3 {
            images += 1;
            html.push_str(&format!(
                "<p><img src=\"https://cdn.example.com/files/hammock-{}.jpg?v=1699999&amp;width=800\" alt=\"Hammock photo\"></p>\n",
                images
            ));
        }
        html.push_str(paragraph);
        index += 1;
    }
    html
}

/// Every `src` attribute value, in document order
pub fn src_values(html: &str) -> Vec<String> {
    SRC_RE.captures_iter(html).map(|c| c[1].to_string()).collect()
}
