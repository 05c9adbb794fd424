use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::{debug, warn};

const JSON_LD_SELECTOR: &str = r#"script[type="application/ld+json"]"#;

/// Schema.org types that describe the page rather than a listing
const NON_LISTING_TYPES: &[&str] = &[
    "WebSite",
    "WebPage",
    "Organization",
    "BreadcrumbList",
    "SearchAction",
    "SiteNavigationElement",
];

/// Extract listing objects from the JSON-LD blocks of a page
pub fn extract_json_ld(html: &str) -> Vec<Value> {
    let selector = match Selector::parse(JSON_LD_SELECTOR) {
        Ok(selector) => selector,
        Err(e) => {
            warn!("Invalid JSON-LD selector: {:?}", e);
            return Vec::new();
        }
    };

    let document = Html::parse_document(html);
    let mut records = Vec::new();

    for element in document.select(&selector) {
        let text: String = element.text().collect();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => collect_listings(value, &mut records),
            Err(e) => debug!("Skipping unparseable JSON-LD block: {}", e),
        }
    }

    records
}

fn collect_listings(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_listings(item, out);
            }
        }
        Value::Object(mut object) => {
            if let Some(graph) = object.remove("@graph") {
                collect_listings(graph, out);
                return;
            }

            let kind = object.get("@type").and_then(Value::as_str).unwrap_or_default();
            if kind == "ItemList" {
                if let Some(Value::Array(elements)) = object.remove("itemListElement") {
                    for element in elements {
                        match element {
                            Value::Object(mut entry) if entry.contains_key("item") => {
                                if let Some(item) = entry.remove("item") {
                                    collect_listings(item, out);
                                }
                            }
                            other => collect_listings(other, out),
                        }
                    }
                }
                return;
            }

            if !NON_LISTING_TYPES.contains(&kind) {
                out.push(Value::Object(object));
            }
        }
        _ => {}
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Invalid pattern '{}': {}", pattern, e);
            None
        }
    }
}

/// Turn each `<property>` or `<listing>` element of a feed into a flat JSON object.
///
/// Direct children become string fields; nested markup is kept as raw text.
pub fn extract_xml_records(xml: &str) -> Vec<Value> {
    let (Some(property), Some(listing), Some(open_tag)) = (
        compile(r"(?s)<property\b[^>]*>(.*?)</property>"),
        compile(r"(?s)<listing\b[^>]*>(.*?)</listing>"),
        compile(r"<([A-Za-z_][\w.\-]*)(?:\s[^>]*)?/?>"),
    ) else {
        return Vec::new();
    };

    let mut bodies: Vec<&str> = property
        .captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if bodies.is_empty() {
        bodies = listing
            .captures_iter(xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
    }

    bodies
        .into_iter()
        .map(|body| Value::Object(child_fields(body, &open_tag)))
        .filter(|record| record.as_object().map_or(false, |o| !o.is_empty()))
        .collect()
}

fn child_fields(body: &str, open_tag: &Regex) -> Map<String, Value> {
    let mut record = Map::new();
    let mut rest = body;

    while let Some(capture) = open_tag.captures(rest) {
        let Some(whole) = capture.get(0) else { break };
        let name = capture[1].to_string();
        let after_open = &rest[whole.end()..];

        if whole.as_str().ends_with("/>") {
            record.insert(name, Value::String(String::new()));
            rest = after_open;
            continue;
        }

        let close = format!("</{}>", name);
        match after_open.find(&close) {
            Some(end) => {
                record.insert(name, Value::String(xml_text(&after_open[..end])));
                rest = &after_open[end + close.len()..];
            }
            None => rest = after_open,
        }
    }

    record
}

fn xml_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
    {
        return inner.to_string();
    }

    trimmed
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_ld_listings() {
        let html = r#"
            <html><head>
            <script type="application/ld+json">{"@type": "WebSite", "name": "Homes"}</script>
            <script type="application/ld+json">
              {"@graph": [
                {"@type": "BreadcrumbList"},
                {"@type": "Apartment", "name": "Sea view flat", "url": "https://homes.example/1"}
              ]}
            </script>
            <script type="application/ld+json">
              {"@type": "ItemList", "itemListElement": [
                {"@type": "ListItem", "position": 1, "item": {"@type": "House", "name": "Cottage"}}
              ]}
            </script>
            <script type="application/ld+json">not json</script>
            </head><body></body></html>
        "#;

        let records = extract_json_ld(html);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], json!("Sea view flat"));
        assert_eq!(records[1]["name"], json!("Cottage"));
    }

    #[test]
    fn test_xml_records() {
        let xml = r#"<?xml version="1.0"?>
            <feed>
              <property id="a">
                <reference>R-1</reference>
                <title><![CDATA[Flat <b>bright</b>]]></title>
                <price>120000</price>
              </property>
              <property>
                <reference>R-2</reference>
                <title>Barn &amp; land</title>
              </property>
            </feed>"#;

        let records = extract_xml_records(xml);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["reference"], json!("R-1"));
        assert_eq!(records[0]["title"], json!("Flat <b>bright</b>"));
        assert_eq!(records[0]["price"], json!("120000"));
        assert_eq!(records[1]["title"], json!("Barn & land"));
    }

    #[test]
    fn test_xml_listing_elements() {
        let xml = "<listings><listing><id>9</id></listing></listings>";
        let records = extract_xml_records(xml);
        assert_eq!(records, vec![json!({"id": "9"})]);
    }
}
