// tests/unit_embed_test.rs

use specular::core::model::message::{Embed, EmbedField, MAX_EMBED_CHARS};
use specular::core::pipeline::normalize::{ChannelRef, MappingSnapshot, rewrite_embed};

fn embed_with_chars(n: usize) -> Embed {
    Embed {
        title: Some("t".repeat(10)),
        description: Some("d".repeat(n.saturating_sub(10))),
        ..Default::default()
    }
}

#[test]
fn test_char_weight_sums_all_textual_parts() {
    let embed = Embed {
        title: Some("abc".to_string()),
        description: Some("defg".to_string()),
        fields: vec![EmbedField {
            name: "hi".to_string(),
            value: "jk".to_string(),
            inline: false,
        }],
        ..Default::default()
    };
    assert_eq!(embed.char_weight(), 3 + 4 + 2 + 2);
}

#[test]
fn test_embed_at_limit_is_valid() {
    assert!(embed_with_chars(MAX_EMBED_CHARS).is_valid());
}

#[test]
fn test_embed_over_limit_is_rejected() {
    assert!(!embed_with_chars(MAX_EMBED_CHARS + 1).is_valid());
}

#[test]
fn test_empty_embed_is_invalid() {
    assert!(!Embed::default().is_valid());
}

#[test]
fn test_image_only_embed_is_valid() {
    let embed = Embed {
        image_url: Some("https://cdn.example/x.png".to_string()),
        ..Default::default()
    };
    assert!(embed.is_valid());
}

#[test]
fn test_rewrite_embed_translates_mentions_in_description() {
    let mut snapshot = MappingSnapshot {
        source_server_id: "10000000000000000001".to_string(),
        mirror_server_id: "20000000000000000001".to_string(),
        ..Default::default()
    };
    snapshot.channels.insert(
        "11111111111111111111".to_string(),
        ChannelRef {
            mirror_id: Some("21111111111111111111".to_string()),
            name: "general".to_string(),
        },
    );
    let embed = Embed {
        title: Some("see <#11111111111111111111>".to_string()),
        description: Some("go to <#11111111111111111111> now".to_string()),
        fields: vec![EmbedField {
            name: "where".to_string(),
            value: "<#11111111111111111111>".to_string(),
            inline: true,
        }],
        ..Default::default()
    };
    let out = rewrite_embed(&embed, &snapshot);
    assert_eq!(out.title.as_deref(), Some("see <#21111111111111111111>"));
    assert_eq!(
        out.description.as_deref(),
        Some("go to <#21111111111111111111> now")
    );
    assert_eq!(out.fields[0].value, "<#21111111111111111111>");
}
