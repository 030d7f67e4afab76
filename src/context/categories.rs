//! Static app → context-type table.
//!
//! Lookup is a lowercase substring match, tried on the bundle identifier
//! first and the display name second, so "com.microsoft.VSCode" and
//! "Code" both land on the same row. Apps nobody listed fall through to a
//! majority vote in the engine, and finally to `Unknown`.

use crate::models::ContextType;

const APP_CATEGORIES: &[(&str, ContextType)] = &[
    // Editors and build tools
    ("visual studio code", ContextType::Creative),
    ("vscode", ContextType::Creative),
    ("xcode", ContextType::Creative),
    ("intellij", ContextType::Creative),
    ("sublime", ContextType::Creative),
    ("neovim", ContextType::Creative),
    ("cursor", ContextType::Creative),
    ("editor", ContextType::Creative),
    ("zed", ContextType::Creative),
    ("vim", ContextType::Creative),
    // Design
    ("photoshop", ContextType::Creative),
    ("illustrator", ContextType::Creative),
    ("blender", ContextType::Creative),
    ("figma", ContextType::Creative),
    ("sketch", ContextType::Creative),
    // Terminals, writing, knowledge bases
    ("terminal", ContextType::DeepWork),
    ("obsidian", ContextType::DeepWork),
    ("notion", ContextType::DeepWork),
    ("iterm", ContextType::DeepWork),
    ("warp", ContextType::DeepWork),
    ("notes", ContextType::DeepWork),
    ("pages", ContextType::DeepWork),
    ("word", ContextType::DeepWork),
    // Browsers
    ("firefox", ContextType::Exploration),
    ("browser", ContextType::Exploration),
    ("safari", ContextType::Exploration),
    ("chrome", ContextType::Exploration),
    ("brave", ContextType::Exploration),
    ("edge", ContextType::Exploration),
    ("arc", ContextType::Exploration),
    // Communication
    ("thunderbird", ContextType::Communication),
    ("messages", ContextType::Communication),
    ("telegram", ContextType::Communication),
    ("whatsapp", ContextType::Communication),
    ("discord", ContextType::Communication),
    ("slack", ContextType::Communication),
    ("teams", ContextType::Communication),
    ("zoom", ContextType::Communication),
    ("mail", ContextType::Communication),
    // Admin
    ("system settings", ContextType::Administrative),
    ("activity monitor", ContextType::Administrative),
    ("preferences", ContextType::Administrative),
    ("1password", ContextType::Administrative),
    ("calendar", ContextType::Administrative),
    ("finder", ContextType::Administrative),
    // Leisure
    ("podcasts", ContextType::Leisure),
    ("spotify", ContextType::Leisure),
    ("netflix", ContextType::Leisure),
    ("youtube", ContextType::Leisure),
    ("steam", ContextType::Leisure),
    ("music", ContextType::Leisure),
];

pub fn category_for(app_identifier: Option<&str>, app_name: Option<&str>) -> Option<ContextType> {
    app_identifier
        .and_then(lookup)
        .or_else(|| app_name.and_then(lookup))
}

fn lookup(value: &str) -> Option<ContextType> {
    let needle = value.to_lowercase();
    APP_CATEGORIES
        .iter()
        .find(|(pattern, _)| needle.contains(pattern))
        .map(|(_, category)| *category)
}

/// Label templates keyed by context type.
pub fn label_for(context_type: ContextType, dominant_app: &str) -> String {
    match context_type {
        ContextType::DeepWork => format!("Deep work in {dominant_app}"),
        ContextType::Exploration => format!("Browsing in {dominant_app}"),
        ContextType::Communication => format!("Catching up in {dominant_app}"),
        ContextType::Creative => format!("Creating in {dominant_app}"),
        ContextType::Administrative => format!("Organizing in {dominant_app}"),
        ContextType::Leisure => format!("Taking a break in {dominant_app}"),
        ContextType::Unknown => format!("Working in {dominant_app}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_identifier_before_name() {
        assert_eq!(
            category_for(Some("com.microsoft.VSCode"), Some("Mystery")),
            Some(ContextType::Creative)
        );
        assert_eq!(
            category_for(Some("com.example.opaque"), Some("Safari")),
            Some(ContextType::Exploration)
        );
        assert_eq!(category_for(Some("com.example.opaque"), Some("Mystery")), None);
    }

    #[test]
    fn generic_names_still_classify() {
        assert_eq!(
            category_for(None, Some("Editor")),
            Some(ContextType::Creative)
        );
        assert_eq!(
            category_for(None, Some("Browser")),
            Some(ContextType::Exploration)
        );
    }
}
