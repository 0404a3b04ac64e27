use super::*;
use chrono::TimeZone;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use serde_json::json;

fn props(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        other => panic!("test bag must be an object, got {}", other),
    }
}

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

#[test]
fn test_map_card_from() {
    let card = map_card_from(&props(json!({
        "name": "Peter",
        "url": "https://p83.nl/",
        "photo": "https://peterstuifzand.nl/img/profile.jpg",
        "locality": "Amsterdam",
        "country-name": "NL",
        "latitude": 52
    })));

    assert_eq!(card.kind, "card");
    assert_eq!(card.name.as_deref(), Some("Peter"));
    assert_eq!(card.url.as_deref(), Some("https://p83.nl/"));
    assert_eq!(card.photo.as_deref(), Some("https://peterstuifzand.nl/img/profile.jpg"));
    assert_eq!(card.locality.as_deref(), Some("Amsterdam"));
    assert_eq!(card.country_name.as_deref(), Some("NL"));
    // numbers are not strings; the field is left unknown
    assert_eq!(card.latitude, None);
    assert_eq!(card.longitude, None);
}

#[test]
fn test_map_item_from() {
    let item = map_item_from(&props(json!({
        "type": "entry",
        "name": "Title",
        "content": { "value": "Simple content", "html": "<p>Simple content</p>" },
        "like-of": ["https://p83.nl/", "https://p83.nl/test.html"]
    })));

    assert_eq!(item.kind, "entry");
    assert_eq!(item.name.as_deref(), Some("Title"));
    let content = item.content.expect("content");
    assert_eq!(content.text.as_deref(), Some("Simple content"));
    assert_eq!(content.html.as_deref(), Some("<p>Simple content</p>"));
    assert_eq!(item.like_of, vec!["https://p83.nl/", "https://p83.nl/test.html"]);
}

#[rstest]
#[case::bare_string(json!("https://example.com/a"))]
#[case::list_of_strings(json!(["https://example.com/a"]))]
#[case::list_of_citations(json!([{ "type": "cite", "url": "https://example.com/a", "name": "A" }]))]
#[case::single_citation(json!({ "url": "https://example.com/a" }))]
fn in_reply_to_shapes_agree(#[case] value: Value) {
    let item = map_item_from(&props(json!({ "in-reply-to": value })));
    assert_eq!(item.in_reply_to, vec!["https://example.com/a"]);
}

#[test]
fn in_reply_to_mixed_list_keeps_every_url() {
    let item = map_item_from(&props(json!({
        "in-reply-to": ["https://a.example/", { "url": "https://b.example/" }, 7, { "name": "no url" }]
    })));
    assert_eq!(item.in_reply_to, vec!["https://a.example/", "https://b.example/"]);
}

#[rstest]
#[case::bare_string(json!("tech"), vec!["tech"])]
#[case::strings(json!(["tech", "go"]), vec!["tech", "go"])]
#[case::tag_objects(json!([{ "value": "tech" }, { "value": "go" }]), vec!["tech", "go"])]
#[case::mixed(json!(["tech", { "value": "go" }, null]), vec!["tech", "go"])]
fn category_shapes(#[case] value: Value, #[case] expected: Vec<&str>) {
    let item = map_item_from(&props(json!({ "category": value })));
    assert_eq!(item.category, expected);
}

#[rstest]
#[case::string(json!("https://example.com/r"), vec!["https://example.com/r"])]
#[case::list(json!(["https://example.com/r", 1]), vec!["https://example.com/r"])]
#[case::object(json!({ "url": "https://example.com/r" }), vec![])]
fn repost_of_shapes(#[case] value: Value, #[case] expected: Vec<&str>) {
    let item = map_item_from(&props(json!({ "repost-of": value })));
    assert_eq!(item.repost_of, expected);
}

#[test]
fn like_and_bookmark_require_lists() {
    let item = map_item_from(&props(json!({
        "like-of": "https://example.com/liked",
        "bookmark-of": ["https://example.com/b", { "url": "https://example.com/x" }]
    })));
    assert!(item.like_of.is_empty());
    assert_eq!(item.bookmark_of, vec!["https://example.com/b"]);
}

#[test]
fn malformed_properties_are_skipped_not_fatal() {
    let item = map_item_at(
        &props(json!({
            "name": ["not", "a", "string"],
            "url": "https://example.com/post",
            "content": 42,
            "author": 3.5,
            "photo": { "oops": true },
            "_is_read": "yes",
            "published": "2024-01-02T03:04:05Z"
        })),
        fixed_now(),
    );

    assert_eq!(item.name, None);
    assert_eq!(item.url.as_deref(), Some("https://example.com/post"));
    assert_eq!(item.content, None);
    assert_eq!(item.author, None);
    assert!(item.photo.is_empty());
    assert!(!item.read);
    assert_eq!(item.published, "2024-01-02T03:04:05Z");
}

#[test]
fn content_without_html_or_value_stays_unset() {
    let item = map_item_from(&props(json!({ "content": { "lang": "en" } })));
    assert_eq!(item.content, None);

    let item = map_item_from(&props(json!({ "content": "plain words" })));
    assert_eq!(item.content.and_then(|c| c.text).as_deref(), Some("plain words"));
}

#[test]
fn author_and_checkin_map_through_cards() {
    let item = map_item_from(&props(json!({
        "author": { "name": "Peter", "url": "https://p83.nl/" },
        "checkin": { "name": "Cafe", "latitude": "52.1", "longitude": "4.3", "locality": "Utrecht" }
    })));
    let author = item.author.expect("author");
    assert_eq!(author.name.as_deref(), Some("Peter"));
    let checkin = item.checkin.expect("checkin");
    assert_eq!(checkin.latitude.as_deref(), Some("52.1"));
    assert_eq!(checkin.locality.as_deref(), Some("Utrecht"));

    let by_url = map_item_from(&props(json!({ "author": "https://p83.nl/" })));
    assert_eq!(by_url.author.and_then(|a| a.url).as_deref(), Some("https://p83.nl/"));
    let by_name = map_item_from(&props(json!({ "author": "Peter" })));
    assert_eq!(by_name.author.and_then(|a| a.name).as_deref(), Some("Peter"));
}

#[test]
fn missing_published_defaults_to_now() {
    let item = map_item_at(&props(json!({ "name": "x" })), fixed_now());
    assert_eq!(item.published, "2024-03-01T12:00:00Z");
}

#[rstest]
#[case("2018-04-25T11:14:00-07:00", "2018-04-25T11:14:00-07:00")]
#[case("2018-04-25 11:14-0700", "2018-04-25T11:14:00-07:00")]
#[case("2018-04-25 11:14:30+0200", "2018-04-25T11:14:30+02:00")]
#[case("2018-04-25T11:14:30", "2018-04-25T11:14:30Z")]
#[case("2018-04-25", "2018-04-25T00:00:00Z")]
fn published_forms_normalize_to_rfc3339(#[case] raw: &str, #[case] expected: &str) {
    let item = map_item_at(&props(json!({ "published": raw })), fixed_now());
    assert_eq!(item.published, expected);
}

#[test]
fn unparseable_published_falls_back_to_now() {
    let item = map_item_at(&props(json!({ "published": "last tuesday" })), fixed_now());
    assert_eq!(item.published, "2024-03-01T12:00:00Z");
}

#[test]
fn verbatim_scalars_are_copied() {
    let item = map_item_from(&props(json!({
        "_id": "abc",
        "_is_read": true,
        "uid": "tag:example.com,2024:1",
        "updated": "2024-01-01 10:00",
        "url": "https://example.com/1"
    })));
    assert_eq!(item.id, "abc");
    assert!(item.read);
    assert_eq!(item.uid.as_deref(), Some("tag:example.com,2024:1"));
    assert_eq!(item.updated.as_deref(), Some("2024-01-01 10:00"));
}

#[test]
fn derived_ids_are_stable_and_prefer_uid() {
    let a = map_item_from(&props(json!({ "uid": "u1", "url": "https://example.com/1" })));
    let b = map_item_from(&props(json!({ "uid": "u1", "url": "https://example.com/other" })));
    let c = map_item_from(&props(json!({ "url": "https://example.com/1" })));
    let d = map_item_from(&props(json!({ "url": "https://example.com/1" })));

    assert!(!a.id.is_empty());
    assert_eq!(a.id, b.id);
    assert_ne!(a.id, c.id);
    assert_eq!(c.id, d.id);

    let bare1 = map_item_from(&props(json!({ "name": "no identity" })));
    let bare2 = map_item_from(&props(json!({ "name": "no identity" })));
    assert_eq!(bare1.id, bare2.id);
}

fn url_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,12}(/[a-z0-9]{0,8}){0,3}".prop_map(|path| format!("https://{}", path))
}

proptest! {
    #[test]
    fn prop_in_reply_to_shape_does_not_change_urls(urls in prop::collection::vec(url_strategy(), 1..6)) {
        let as_strings = map_item_from(&props(json!({ "in-reply-to": urls.clone() })));
        let cites: Vec<Value> = urls.iter().map(|u| json!({ "type": "cite", "url": u })).collect();
        let as_cites = map_item_from(&props(json!({ "in-reply-to": cites })));

        prop_assert_eq!(&as_strings.in_reply_to, &urls);
        prop_assert_eq!(&as_cites.in_reply_to, &urls);
        if urls.len() == 1 {
            let as_scalar = map_item_from(&props(json!({ "in-reply-to": urls[0].clone() })));
            prop_assert_eq!(&as_scalar.in_reply_to, &urls);
        }
    }

    #[test]
    fn prop_missing_published_is_filled(name in ".{0,40}", url in url_strategy()) {
        let item = map_item_from(&props(json!({ "name": name, "url": url })));
        prop_assert!(!item.published.is_empty());
        prop_assert!(item.published_at().is_some());
    }

    #[test]
    fn prop_arbitrary_json_never_panics(value in json_strategy()) {
        let bag = props(json!({
            "in-reply-to": value.clone(),
            "category": value.clone(),
            "author": value.clone(),
            "content": value.clone(),
            "published": value,
        }));
        let item = map_item_from(&bag);
        prop_assert!(item.published_at().is_some());
        prop_assert!(!item.id.is_empty());
    }
}

fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        ".{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}
