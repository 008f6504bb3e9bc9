use crate::config::FieldSpec;
use crate::models::FieldValues;
use crate::parser::{RawItem, MEDIA_NAMESPACE};

/// Extracts one field from an item. Missing data yields an empty string.
pub fn extract(item: &RawItem, field: &str) -> String {
    match field {
        "media" => media_url(item),
        "category" => item
            .children("category")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        _ => item.text(field).unwrap_or_default().to_string(),
    }
}

/// Extracts every requested field, in request order.
pub fn extract_all(item: &RawItem, fields: &FieldSpec) -> FieldValues {
    let mut values = FieldValues::default();
    for field in fields.iter() {
        values.insert(field, extract(item, field));
    }
    values
}

// media:content, then media:thumbnail, then a plain enclosure
fn media_url(item: &RawItem) -> String {
    let from_media = item.namespaced(MEDIA_NAMESPACE).and_then(|media| {
        ["content", "thumbnail"].into_iter().find_map(|name| {
            media
                .first(name)
                .and_then(|e| e.attr("url"))
                .filter(|url| !url.is_empty())
        })
    });

    from_media
        .or_else(|| item.child("enclosure").and_then(|e| e.attr("url")))
        .unwrap_or_default()
        .to_string()
}
