use crate::{dates, model::Author};
use scraper::{ElementRef, Html, Selector};
use time::PrimitiveDateTime;
use tracing::{debug, warn};
use url::Url;

const DETAIL_LABELS: &str = "div.rightDetailsBlock > div > div.detailsStatLeft";
const DETAIL_VALUES: &str = "div.rightDetailsBlock > div > div.detailsStatRight";
const PREVIEW_PRIMARY: &str = "img#previewImageMain";
const PREVIEW_FALLBACK: &str = "img#previewImage";
const REQUIRED_ITEMS: &str = "div#RequiredItems > a";
const CREATOR_BLOCKS: &str = "div.creatorsBlock > div.friendBlock";
const CREATOR_NAME: &str = "div.friendBlockContent";
const CREATOR_PROFILE: &str = "a.friendBlockLinkOverlay";
const CREATOR_AVATAR: &str = "div.playerAvatar > img";
const REMOVED_MARKER: &str = "div.error_ctn";

/// Data scraped from one catalog listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRecord {
    pub file_size: Option<String>,
    pub uploaded_at: Option<PrimitiveDateTime>,
    pub last_updated_at: Option<PrimitiveDateTime>,
    pub preview_image_url: Option<String>,
    /// Catalog ids of required items, in page order.
    pub dependency_ids: Vec<u64>,
    pub authors: Vec<Author>,
    /// Required-item links that carried no usable `id` parameter.
    pub rejected_links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageExtract {
    Listing(RemoteRecord),
    Removed,
}

#[derive(Debug, Clone, Copy)]
enum Detail {
    Posted,
    Updated,
    FileSize,
}

/// Label text of the details block and the field each one fills.
const DETAILS: [(&str, Detail); 3] = [
    ("Posted", Detail::Posted),
    ("Updated", Detail::Updated),
    ("File Size", Detail::FileSize),
];

impl Detail {
    fn apply(self, record: &mut RemoteRecord, value: &str) {
        match self {
            Detail::Posted => record.uploaded_at = parse_detail_date("Posted", value),
            Detail::Updated => record.last_updated_at = parse_detail_date("Updated", value),
            Detail::FileSize => record.file_size = Some(value.to_string()),
        }
    }
}

/// Extracts the listing fields from a catalog page. `page_url` resolves
/// relative links.
pub fn extract(html: &str, page_url: &str) -> PageExtract {
    let document = Html::parse_document(html);
    let root = document.root_element();

    if !select_all(root, REMOVED_MARKER).is_empty() {
        return PageExtract::Removed;
    }

    let mut record = RemoteRecord::default();

    let labels = select_all(root, DETAIL_LABELS);
    let values = select_all(root, DETAIL_VALUES);
    for (label, value) in labels.iter().zip(values.iter()) {
        let label = collapse_text(*label);
        let value = collapse_text(*value);
        if let Some((_, detail)) = DETAILS.iter().find(|(text, _)| *text == label) {
            detail.apply(&mut record, &value);
        }
    }

    record.preview_image_url = first_attr(root, PREVIEW_PRIMARY, "src")
        .or_else(|| first_attr(root, PREVIEW_FALLBACK, "src"));

    let base = Url::parse(page_url).ok();
    for link in select_all(root, REQUIRED_ITEMS) {
        let href = link.value().attr("href").unwrap_or_default();
        match dependency_id(base.as_ref(), href) {
            Some(id) => {
                if !record.dependency_ids.contains(&id) {
                    record.dependency_ids.push(id);
                }
            }
            None => {
                warn!("required item link without usable id: {href:?}");
                record.rejected_links.push(href.to_string());
            }
        }
    }

    for block in select_all(root, CREATOR_BLOCKS) {
        let name = select_all(block, CREATOR_NAME)
            .first()
            .and_then(|content| {
                content
                    .text()
                    .map(str::trim)
                    .find(|text| !text.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        let profile_url = first_attr(block, CREATOR_PROFILE, "href");
        let icon_url = first_attr(block, CREATOR_AVATAR, "src");
        if name.is_empty() && profile_url.is_none() {
            continue;
        }
        record.authors.push(Author {
            name,
            profile_url,
            icon_url,
        });
    }

    PageExtract::Listing(record)
}

/// Reads the `id` query parameter of a required-item link.
pub fn dependency_id(base: Option<&Url>, href: &str) -> Option<u64> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
}

fn parse_detail_date(label: &str, value: &str) -> Option<PrimitiveDateTime> {
    let parsed = dates::parse_catalog_date(value);
    if parsed.is_none() {
        debug!("unrecognised {label} date: {value:?}");
    }
    parsed
}

fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => scope.select(&selector).collect(),
        Err(err) => {
            warn!("invalid selector {css:?}: {err}");
            Vec::new()
        }
    }
}

fn first_attr(scope: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    select_all(scope, css)
        .into_iter()
        .find_map(|element| element.value().attr(attr).map(str::to_string))
        .filter(|value| !value.trim().is_empty())
}

fn collapse_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    const PAGE_URL: &str = "https://steamcommunity.com/sharedfiles/filedetails/?id=1229025788";

    const LISTING: &str = r#"<html><body>
<div class="workshopItemPreviewImageMain">
  <img id="previewImageMain" src="https://images.example/preview-main.jpg">
</div>
<div class="rightDetailsBlock">
  <div class="detailsStatsContainerLeft">
    <div class="detailsStatLeft">File Size </div>
    <div class="detailsStatLeft">Posted </div>
    <div class="detailsStatLeft">Updated </div>
  </div>
  <div class="detailsStatsContainerRight">
    <div class="detailsStatRight">1.204 MB</div>
    <div class="detailsStatRight">31 Mar, 2021 @ 6:48am</div>
    <div class="detailsStatRight">2 Apr, 2021 @ 10:01pm</div>
  </div>
</div>
<div id="RequiredItems">
  <a href="https://steamcommunity.com/workshop/filedetails/?id=838445149" target="_blank">
    <div class="requiredItem">Mod Config Menu</div>
  </a>
  <a href="/sharedfiles/filedetails/?l=english&amp;id=2489635144"><div>REPENTOGON</div></a>
  <a href="https://steamcommunity.com/workshop/filedetails/?l=english"><div>broken</div></a>
</div>
<div class="creatorsBlock">
  <div class="friendBlock persona offline">
    <a class="friendBlockLinkOverlay" href="https://steamcommunity.com/id/jerry/"></a>
    <div class="playerAvatar offline"><img src="https://avatars.example/jerry.jpg"></div>
    <div class="friendBlockContent">
      Jerry<br><span class="friendSmallText">Owner</span>
    </div>
  </div>
  <div class="friendBlock persona online">
    <a class="friendBlockLinkOverlay" href="https://steamcommunity.com/id/elaine/"></a>
    <div class="playerAvatar online"><img src="https://avatars.example/elaine.jpg"></div>
    <div class="friendBlockContent">Elaine<br><span class="friendSmallText">Online</span></div>
  </div>
</div>
</body></html>"#;

    #[test]
    fn extracts_listing_fields() {
        let PageExtract::Listing(record) = extract(LISTING, PAGE_URL) else {
            panic!("listing was treated as removed");
        };
        assert_eq!(record.file_size.as_deref(), Some("1.204 MB"));
        assert_eq!(record.uploaded_at, Some(datetime!(2021-03-31 06:48)));
        assert_eq!(record.last_updated_at, Some(datetime!(2021-04-02 22:01)));
        assert_eq!(
            record.preview_image_url.as_deref(),
            Some("https://images.example/preview-main.jpg")
        );
        assert_eq!(record.dependency_ids, vec![838445149, 2489635144]);
        assert_eq!(
            record.rejected_links,
            vec!["https://steamcommunity.com/workshop/filedetails/?l=english".to_string()]
        );
        assert_eq!(
            record.authors,
            vec![
                Author {
                    name: "Jerry".into(),
                    profile_url: Some("https://steamcommunity.com/id/jerry/".into()),
                    icon_url: Some("https://avatars.example/jerry.jpg".into()),
                },
                Author {
                    name: "Elaine".into(),
                    profile_url: Some("https://steamcommunity.com/id/elaine/".into()),
                    icon_url: Some("https://avatars.example/elaine.jpg".into()),
                },
            ]
        );
    }

    #[test]
    fn falls_back_to_secondary_preview() {
        let html = r#"<html><body><img id="previewImage" src="https://images.example/small.png"></body></html>"#;
        let PageExtract::Listing(record) = extract(html, PAGE_URL) else {
            panic!("listing was treated as removed");
        };
        assert_eq!(
            record.preview_image_url.as_deref(),
            Some("https://images.example/small.png")
        );
        assert!(record.dependency_ids.is_empty());
        assert!(record.authors.is_empty());
    }

    #[test]
    fn error_marker_means_removed() {
        let html = r#"<html><body><div id="message"><div class="error_ctn">
            <h3>There was a problem accessing the item. Please try again.</h3></div></div></body></html>"#;
        assert_eq!(extract(html, PAGE_URL), PageExtract::Removed);
    }

    #[test]
    fn dependency_ids_from_relative_and_absolute_links() {
        let base = Url::parse(PAGE_URL).ok();
        assert_eq!(
            dependency_id(base.as_ref(), "?id=42&searchtext="),
            Some(42)
        );
        assert_eq!(dependency_id(None, "https://x.example/?id=7"), Some(7));
        assert_eq!(dependency_id(None, "/relative?id=7"), None);
        assert_eq!(dependency_id(base.as_ref(), "?id=abc"), None);
    }
}
