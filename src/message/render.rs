//! Presentation rendering for a resolved mail: wiki markup and HTML
//! fragments, layered on top of the parsed message.

use crate::message::{normalize_message_id, MessageView};

/// A resolved mail with its lookup context, ready for rendering.
#[derive(Debug, Clone)]
pub struct MailDocument {
    /// User whose archive the mail came from.
    pub user: String,
    /// Normalized message id (no angle brackets).
    pub mailid: String,
    /// Relative folder path of the owning mailbox.
    pub folder_path: String,
    /// The parsed message.
    pub message: MessageView,
}

impl MailDocument {
    pub fn new(
        user: impl Into<String>,
        mailid: &str,
        folder_path: impl Into<String>,
        message: MessageView,
    ) -> Self {
        Self {
            user: user.into(),
            mailid: normalize_message_id(mailid),
            folder_path: folder_path.into(),
            message,
        }
    }

    /// `mailto:` link markup for the From header, if present.
    pub fn from_url(&self) -> Option<String> {
        let from = self.message.header("From");
        if from == "?" {
            return None;
        }
        Some(format!("<a href='mailto:{from}'>{from}</a>"))
    }

    /// `mailto:` link markup for the To header, if present.
    pub fn to_url(&self) -> Option<String> {
        let to = self.message.header("To");
        if to == "?" {
            return None;
        }
        Some(format!("<a href='mailto:{to}'>{to}</a>"))
    }

    /// Fixed-template single-record markup (WikiSon notation) suitable for
    /// wiki-style transclusion.
    pub fn as_wiki_markup(&self) -> String {
        format!(
            "{{{{mail\n|user={}\n|id={}\n|from={}\n|to={}\n|subject={}\n|date={}\n}}}}",
            self.user,
            self.mailid,
            self.message.header("From"),
            self.message.header("To"),
            self.message.header("Subject"),
            self.message.header("Date"),
        )
    }

    /// One named HTML section for embedding in a larger page.
    ///
    /// Known sections: `title`, `wiki`, `info`, `headers`, `parts`, `text`.
    pub fn as_html_section(&self, section_name: &str) -> String {
        let mut html_parts: Vec<String> = Vec::new();
        let table_sections = ["info", "parts", "headers"];
        if table_sections.contains(&section_name) {
            html_parts.push(format!("<table id='{section_name}Table'>"));
        }
        match section_name {
            "title" => {
                if !self.mailid.is_empty() {
                    html_parts.push(format!("<h2>{}</h2>", self.mailid));
                }
            }
            "wiki" => html_parts.push(self.as_wiki_markup()),
            "info" => {
                html_parts.push(table_line("User", &self.user));
                html_parts.push(table_line("Folder", &self.folder_path));
                html_parts.push(table_line("From", &self.from_url().unwrap_or_default()));
                html_parts.push(table_line("To", &self.to_url().unwrap_or_default()));
                html_parts.push(table_line("Date", &self.message.header("Date")));
                html_parts.push(table_line("Subject", &self.message.header("Subject")));
            }
            "headers" => {
                for (key, value) in self.message.headers() {
                    html_parts.push(table_line(key, value));
                }
            }
            "parts" => {
                for index in 0..self.message.parts().len() {
                    html_parts.push(self.part_row(index));
                }
            }
            "text" => {
                html_parts.push(format!(
                    "<hr><p id='txtMsg'>{}</p><hr><div id='htmlMsg'>{}</div>",
                    self.message.text(),
                    self.message.html()
                ));
            }
            _ => {}
        }
        if table_sections.contains(&section_name) {
            html_parts.push("</table>".to_string());
        }
        html_parts.join("")
    }

    /// Full HTML rendering: title, info, parts, and text sections.
    pub fn as_html(&self) -> String {
        ["title", "info", "parts", "text"]
            .iter()
            .map(|section| self.as_html_section(section))
            .collect()
    }

    /// One table row for a MIME part, with a header row before the first.
    fn part_row(&self, index: usize) -> String {
        let part = &self.message.parts()[index];
        let header = if index == 0 {
            "<tr><th>#</th><th>Content Type</th><th>Charset</th>\
             <th>Filename</th><th style='text-align:right'>Length</th></tr>"
        } else {
            ""
        };
        let link = format!(
            "<a href='/part/{}/{}/{}'>{}</a>",
            self.user, self.mailid, index, part.filename
        );
        format!(
            "{header}<tr><th>{}:</th><td>{}</td><td>{}</td><td>{}</td>\
             <td style='text-align:right'>{}</td><tr>",
            index + 1,
            part.content_type,
            part.charset.as_deref().unwrap_or("-"),
            link,
            part.length
        )
    }
}

fn table_line(key: &str, value: &str) -> String {
    format!("<tr><th>{key}:</th><td>{value}</td><tr>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageView;

    const RAW: &[u8] = b"From MAILER-DAEMON Sat Oct 24 14:37:31 2020\n\
From: wikidata-request@lists.wikimedia.org\n\
Subject: Wikidata Digest, Vol 107, Issue 2\n\
To: wikidata@lists.wikimedia.org\n\
Date: Sat, 03 Oct 2020 12:00:03 +0000\n\
Message-ID: <mailman.45.1601640003.19840.wikidata@lists.wikimedia.org>\n\
\n\
body\n";

    fn doc() -> MailDocument {
        MailDocument::new(
            "wf",
            "mailman.45.1601640003.19840.wikidata@lists.wikimedia.org",
            "/WF.sbd/2020-10",
            MessageView::parse(RAW),
        )
    }

    #[test]
    fn test_wiki_markup() {
        let expected = "{{mail\n\
|user=wf\n\
|id=mailman.45.1601640003.19840.wikidata@lists.wikimedia.org\n\
|from=wikidata-request@lists.wikimedia.org\n\
|to=wikidata@lists.wikimedia.org\n\
|subject=Wikidata Digest, Vol 107, Issue 2\n\
|date=Sat, 03 Oct 2020 12:00:03 +0000\n\
}}";
        assert_eq!(doc().as_wiki_markup(), expected);
    }

    #[test]
    fn test_mailto_links() {
        let doc = doc();
        assert_eq!(
            doc.from_url().unwrap(),
            "<a href='mailto:wikidata-request@lists.wikimedia.org'>wikidata-request@lists.wikimedia.org</a>"
        );
        assert_eq!(
            doc.to_url().unwrap(),
            "<a href='mailto:wikidata@lists.wikimedia.org'>wikidata@lists.wikimedia.org</a>"
        );
    }

    #[test]
    fn test_html_sections() {
        let doc = doc();
        let title = doc.as_html_section("title");
        assert!(title.contains("<h2>mailman.45"));
        let info = doc.as_html_section("info");
        assert!(info.starts_with("<table id='infoTable'>"));
        assert!(info.contains("<th>Folder:</th><td>/WF.sbd/2020-10</td>"));
        let headers = doc.as_html_section("headers");
        assert!(headers.contains("<th>Subject:</th>"));
        assert!(doc.as_html_section("unknown").is_empty());
        let full = doc.as_html();
        assert!(full.contains("<h2>mailman.45"));
        assert!(full.contains("infoTable"));
    }
}
