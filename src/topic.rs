use quick_xml::events::Event;
use quick_xml::reader::Reader;

const OPEN_TAG: &str = "<remote-vibe>";
const CLOSE_TAG: &str = "</remote-vibe>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTags {
    pub directory: Option<String>,
    pub app_id: Option<String>,
}

impl ChannelTags {
    /// A channel is owned by `app_id` when the descriptor names that app, or
    /// when it names no app at all.
    pub fn owned_by(&self, app_id: &str) -> bool {
        match &self.app_id {
            Some(id) => id == app_id,
            None => true,
        }
    }
}

pub fn assemble_topic(directory: &str, app_id: &str) -> String {
    format!("{OPEN_TAG}<directory>{directory}</directory><app>{app_id}</app>{CLOSE_TAG}")
}

/// Extract the `<remote-vibe>` descriptor from a channel topic. The topic may
/// contain arbitrary human text around the descriptor; anything unparsable
/// yields empty tags rather than an error.
pub fn extract_tags(topic: &str) -> ChannelTags {
    let Some(start) = topic.find(OPEN_TAG) else {
        return ChannelTags::default();
    };
    let Some(end) = topic[start..].find(CLOSE_TAG) else {
        return ChannelTags::default();
    };
    let fragment = &topic[start..start + end + CLOSE_TAG.len()];

    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(true);

    let mut tags = ChannelTags::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let field = match e.local_name().as_ref() {
                    b"directory" => Some(true),
                    b"app" => Some(false),
                    _ => None,
                };
                if let Some(is_directory) = field {
                    let text = match reader.read_text(e.name()) {
                        Ok(text) => text.trim().to_string(),
                        Err(_) => return ChannelTags::default(),
                    };
                    let slot = if is_directory {
                        &mut tags.directory
                    } else {
                        &mut tags.app_id
                    };
                    if !text.is_empty() {
                        *slot = Some(text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return ChannelTags::default(),
            _ => {}
        }
        buf.clear();
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_descriptor() {
        let topic = "<remote-vibe><directory>/home/dev/proj</directory><app>12345</app></remote-vibe>";
        let tags = extract_tags(topic);
        assert_eq!(tags.directory.as_deref(), Some("/home/dev/proj"));
        assert_eq!(tags.app_id.as_deref(), Some("12345"));
    }

    #[test]
    fn tolerates_surrounding_human_text() {
        let topic = "Project channel! <remote-vibe><directory>/srv/app</directory></remote-vibe> ask me anything";
        let tags = extract_tags(topic);
        assert_eq!(tags.directory.as_deref(), Some("/srv/app"));
        assert_eq!(tags.app_id, None);
    }

    #[test]
    fn missing_descriptor_yields_empty_tags() {
        assert_eq!(extract_tags("just a topic"), ChannelTags::default());
        assert_eq!(extract_tags(""), ChannelTags::default());
    }

    #[test]
    fn malformed_descriptor_never_panics() {
        for topic in [
            "<remote-vibe><directory>/x",
            "<remote-vibe></remote-vibe>",
            "<remote-vibe><directory></directory></remote-vibe>",
            "<remote-vibe><<>></remote-vibe>",
        ] {
            let _ = extract_tags(topic);
        }
    }

    #[test]
    fn round_trips_through_assembly() {
        let topic = assemble_topic("/home/dev/proj", "9876");
        let tags = extract_tags(&topic);
        assert_eq!(tags.directory.as_deref(), Some("/home/dev/proj"));
        assert_eq!(tags.app_id.as_deref(), Some("9876"));

        let reassembled = assemble_topic(
            tags.directory.as_deref().unwrap(),
            tags.app_id.as_deref().unwrap(),
        );
        assert_eq!(extract_tags(&reassembled), tags);
    }

    #[test]
    fn ownership_defaults_to_open_when_app_absent() {
        let open = extract_tags("<remote-vibe><directory>/x</directory></remote-vibe>");
        assert!(open.owned_by("111"));

        let bound = extract_tags(&assemble_topic("/x", "111"));
        assert!(bound.owned_by("111"));
        assert!(!bound.owned_by("222"));
    }
}
