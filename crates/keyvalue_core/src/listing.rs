//! Wikitext for the category index and per-category listing pages.

use serde::Serialize;

use crate::store::CategoryCount;
use crate::triple::Triple;

pub const DEFAULT_SPECIAL_PAGE: &str = "Special:KeyValue";

pub const MSG_AVAILABLE_CATEGORIES: &str = "The following categories are currently in use:";
pub const MSG_VALUES: &str = "values";
pub const MSG_CATEGORIES_TITLE: &str = "KeyValue categories";
pub const MSG_DOWNLOAD_CATEGORY_AS: &str = "Download the data for this category as a";
pub const MSG_CSV_FILE: &str = "csv file";
pub const MSG_KEYVALUES_FOR: &str = "KeyValues for";
pub const MSG_RETURN: &str = "Return to";
pub const MSG_TABLE_RECREATED: &str = "The KeyValue table has been recreated. Pages containing KeyValue instances will not show up in the special pages until they are saved again.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingPage {
    pub title: String,
    pub lines: Vec<String>,
}

impl ListingPage {
    pub fn to_wikitext(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

pub fn render_category_index(special_page: &str, categories: &[CategoryCount]) -> ListingPage {
    let mut lines = Vec::with_capacity(categories.len() + 1);
    lines.push(MSG_AVAILABLE_CATEGORIES.to_string());
    for entry in categories {
        lines.push(format!(
            "* [[{special_page}/{category}|{category}]] ({count} {MSG_VALUES})",
            category = entry.category,
            count = entry.count,
        ));
    }
    ListingPage {
        title: MSG_CATEGORIES_TITLE.to_string(),
        lines,
    }
}

pub fn render_category_page(special_page: &str, category: &str, triples: &[Triple]) -> ListingPage {
    let mut lines = triples
        .iter()
        .map(|triple| format!("* {} = {}", triple.key, triple.value))
        .collect::<Vec<_>>();
    lines.push(String::new());
    lines.push(format!(
        "{MSG_DOWNLOAD_CATEGORY_AS} [{{{{fullurl:{special_page}/{category}|csv=1}}}} {MSG_CSV_FILE}]."
    ));
    lines.push(format!(
        "{MSG_RETURN} [[{special_page}|{MSG_CATEGORIES_TITLE}]]."
    ));
    ListingPage {
        title: format!("{MSG_KEYVALUES_FOR} \"{category}\""),
        lines,
    }
}
