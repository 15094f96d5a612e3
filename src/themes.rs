//! Theme aggregation: group classified posts into one bucket per category.

use serde::Serialize;

use crate::analyze::{CategorySet, ClassifiedItem};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub key: String,
    pub name: String,
    pub count: usize,
    pub posts: Vec<ClassifiedItem>,
}

/// One theme per category in declared order, each holding the posts whose
/// flag for that category is true (input order kept). A post may land in
/// several themes; a missing flag counts as false.
pub fn aggregate_themes(items: &[ClassifiedItem], categories: &CategorySet) -> Vec<Theme> {
    categories
        .iter()
        .map(|c| {
            let posts: Vec<ClassifiedItem> = items
                .iter()
                .filter(|item| item.categories.is_set(&c.key))
                .cloned()
                .collect();
            Theme {
                key: c.key.clone(),
                name: c.display_name.clone(),
                count: posts.len(),
                posts,
            }
        })
        .collect()
}
