use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::Event;

/// The fields of an RSS `<item>` the pollers care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// `slash:comments`, which Slickdeals uses as a like count.
    pub comments: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
    Description,
    Comments,
}

/// Parse every `<item>` of an RSS 2.0 document, in document order.
pub fn parse_items(xml: &str) -> Result<Vec<FeedItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<FeedItem> = None;
    let mut field: Option<Field> = None;
    let mut comments_text = String::new();

    loop {
        match reader.read_event().context("malformed feed xml")? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"item" => current = Some(FeedItem::default()),
                b"title" => field = Some(Field::Title),
                b"link" => field = Some(Field::Link),
                b"description" => field = Some(Field::Description),
                b"comments" => {
                    comments_text.clear();
                    field = Some(Field::Comments);
                }
                _ => field = None,
            },
            Event::Text(t) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = t.unescape().context("bad entity in feed text")?;
                    push_field(item, f, &text, &mut comments_text);
                }
            }
            Event::CData(c) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let raw = c.into_inner();
                    push_field(item, f, &String::from_utf8_lossy(&raw), &mut comments_text);
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"comments" {
                    if let Some(item) = current.as_mut() {
                        // A plain <comments> URL does not parse and is ignored.
                        if let Ok(n) = comments_text.trim().parse::<u32>() {
                            item.comments = Some(n);
                        }
                    }
                }
                if name.as_ref() == b"item" {
                    if let Some(mut item) = current.take() {
                        item.title = item.title.trim().to_string();
                        item.link = item.link.trim().to_string();
                        items.push(item);
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}

fn push_field(item: &mut FeedItem, field: Field, text: &str, comments: &mut String) {
    match field {
        Field::Title => item.title.push_str(text),
        Field::Link => item.link.push_str(text),
        Field::Description => item.description.push_str(text),
        Field::Comments => comments.push_str(text),
    }
}
