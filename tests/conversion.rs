//! End-to-end conversion tests exercising the public API.
//!
//! Each test feeds a legacy HTML body through `convert_body` and checks
//! the resulting SPS XML, the way the conversion is driven in production.

use jatsify::{PipelineContext, RuleTable, convert_body};

fn rules() -> RuleTable {
    RuleTable::parse(
        "fig|fig\ntab|table-wrap\nanx|app\nquad|boxed-text\nf|fn\nt|table-wrap\nq|boxed-text\n",
    )
    .unwrap()
}

fn convert(html: &str) -> String {
    let ctx = PipelineContext::new("S0001-00001998000100001", 1);
    let conv = convert_body(html, &rules(), &ctx, None).unwrap();
    conv.doc.to_xml(conv.body)
}

#[test]
fn legacy_article_body_end_to_end() {
    let html = concat!(
        r#"<div><h2>Introduction</h2><p>Start.</p></div>"#,
        r##"<p>See <a href="#t1">Table 1</a> for details.</p>"##,
        r#"<a name="t1"></a>"#,
        r#"<center><img src="/img/revistas/a05t1.gif"></center>"#,
        r#"<p>After.</p>"#,
    );
    let xml = convert(html);

    assert!(xml.contains(r#"<p content-type="h2">Introduction</p>"#), "{xml}");
    assert!(
        xml.contains(r#"<xref ref-type="table" rid="t1">Table 1</xref>"#),
        "{xml}"
    );
    assert!(xml.contains(r#"<table-wrap id="t1">"#), "{xml}");
    assert!(xml.contains("<label>Table 1</label>"), "{xml}");
    assert!(
        xml.contains(r#"<graphic xlink:href="/img/revistas/a05t1.gif"/>"#),
        "{xml}"
    );
    assert!(
        xml.contains(r#"xmlns:xlink="http://www.w3.org/1999/xlink""#),
        "{xml}"
    );
    assert!(xml.contains("<p>After.</p>"), "{xml}");
}

#[test]
fn clean_sps_body_passes_through_unchanged() {
    let body = concat!(
        "<body><sec>",
        r#"<p content-type="h1">Methods</p>"#,
        "<p>Running text with <bold>bold</bold> and <italic>italic</italic>.</p>",
        r#"<list list-type="bullet"><list-item><p>item</p></list-item></list>"#,
        "<disp-quote><p>quote</p></disp-quote>",
        "</sec></body>",
    );
    assert_eq!(convert(body), body);
}

#[test]
fn conversion_is_idempotent() {
    let html = "<p>one<br>two</p><ul><li>first</li><li>second</li></ul>";
    let first = convert(html);
    let second = convert(&first);
    assert_eq!(first, second);
}

#[test]
fn tag_soup_is_repaired() {
    let xml = convert("<p>one<p>two");
    assert_eq!(xml, "<body><p>one</p><p>two</p></body>");
}

#[test]
fn converted_ids_stay_unique() {
    let html = r#"<p id="x">a</p><p id="x">b</p><p id="x">c</p>"#;
    let xml = convert(html);
    assert!(xml.contains(r#"id="x""#), "{xml}");
    assert!(xml.contains(r#"id="x-duplicate-0""#), "{xml}");
    assert!(xml.contains(r#"id="x-duplicate-1""#), "{xml}");
}

#[test]
fn later_bodies_suffix_generated_ids() {
    let html = r##"<p>see<a href="#f1">1</a></p><a name="f1"></a>the note"##;
    let ctx = PipelineContext::new("S0001-00001998000100001", 2);
    let conv = convert_body(html, &rules(), &ctx, None).unwrap();
    let xml = conv.doc.to_xml(conv.body);
    assert!(xml.contains(r#"<fn id="f1-body2">"#), "{xml}");
    assert!(
        xml.contains(r#"<xref ref-type="fn" rid="f1-body2">1</xref>"#),
        "{xml}"
    );
}

#[test]
fn citation_links_resolve_even_past_reference_list_length() {
    let refs: Vec<String> = (1..=3).map(|n| format!("ref {n}")).collect();
    let ctx = PipelineContext::new("S0001-00001998000100001", 1).with_ref_items(refs);
    let conv = convert_body(
        r##"<p>cited<a href="#ref">5</a></p>"##,
        &rules(),
        &ctx,
        None,
    )
    .unwrap();
    let xml = conv.doc.to_xml(conv.body);
    assert!(
        xml.contains(r#"<xref ref-type="bibr" rid="B5">5</xref>"#),
        "{xml}"
    );
}

#[test]
fn unresolved_star_anchors_vanish() {
    let xml = convert(r##"<p>author<a href="#back">*</a></p>"##);
    assert_eq!(xml, "<body><p>author</p></body>");
}
