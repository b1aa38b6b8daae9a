use std::fmt::Write;

use crate::app::hierarchy::{escape_markup, HierarchyNode};

const HTML_PREFIX: &str = "\
<!doctype html>\n\
<html>\n\
<head>\n\
<meta charset=\"utf-8\" />\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n\
<title>Window hierarchy</title>\n\
<style>\n\
:root{\n\
  --ui-bg: #f7f7fb;\n\
  --ui-panel: #ffffff;\n\
  --ui-border: #d3d7e0;\n\
  --ui-text: #0f172a;\n\
  --ui-muted: #475569;\n\
  --ui-accent: #0a59f7;\n\
  --ui-ok: #166534;\n\
}\n\
html, body { height: 100%; }\n\
body{\n\
  margin: 0;\n\
  font-family: -apple-system, BlinkMacSystemFont, \"Segoe UI\", Helvetica, Arial, sans-serif;\n\
  font-size: 12px;\n\
  line-height: 1.35;\n\
  color: var(--ui-text);\n\
  background: var(--ui-bg);\n\
  padding: 10px;\n\
}\n\
ul {\n\
  list-style-type: none;\n\
  padding-left: 0;\n\
  margin: 0;\n\
}\n\
li {\n\
  margin: 3px 0;\n\
  position: relative;\n\
}\n\
li > .ui-row {\n\
  display: flex;\n\
  align-items: baseline;\n\
  gap: 8px;\n\
  padding: 4px 8px 4px 14px;\n\
  border: 1px solid var(--ui-border);\n\
  background: var(--ui-panel);\n\
  border-radius: 8px;\n\
}\n\
li > ul {\n\
  margin-left: 14px;\n\
  padding-left: 14px;\n\
  border-left: 1px dashed rgba(136, 146, 166, 0.85);\n\
}\n\
li:before{\n\
  content: '\\2192';\n\
  position: absolute;\n\
  left: 0;\n\
  top: 5px;\n\
  color: rgba(136, 146, 166, 0.95);\n\
  font-size: 11px;\n\
}\n\
.ui-tag {\n\
  font-weight: 700;\n\
}\n\
.ui-id {\n\
  color: var(--ui-accent);\n\
}\n\
.ui-text {\n\
  color: var(--ui-ok);\n\
}\n\
.ui-desc {\n\
  color: var(--ui-muted);\n\
}\n\
.ui-bounds {\n\
  color: var(--ui-muted);\n\
  font-family: ui-monospace, SFMono-Regular, Menlo, Monaco, Consolas, \"Liberation Mono\", \"Courier New\", monospace;\n\
  font-size: 11px;\n\
}\n\
</style>\n\
</head>\n\
<body>\n";

const HTML_SUFFIX: &str = "\n</body>\n</html>\n";

/// Standalone page listing the annotated hierarchy, one row per element.
pub fn render_hierarchy_html(root: &HierarchyNode) -> String {
    let mut output = String::with_capacity(HTML_PREFIX.len() + root.node_count() * 160);
    output.push_str(HTML_PREFIX);
    output.push_str("<ul>");
    let mut node_index = 0usize;
    render_node(root, &mut node_index, &mut output);
    output.push_str("</ul>");
    output.push_str(HTML_SUFFIX);
    output
}

fn render_node(node: &HierarchyNode, node_index: &mut usize, output: &mut String) {
    output.push_str("<li");
    // Only elements with geometry can be picked on the screenshot.
    if node.geometry.is_some() {
        let current = *node_index;
        *node_index += 1;
        let _ = write!(
            output,
            " id=\"ui-node-{current}\" data-ui-node-index=\"{current}\""
        );
    }
    output.push('>');
    output.push_str("<div class=\"ui-row\">");
    output.push_str("<span class=\"ui-tag\">");
    output.push_str(&escape_markup(&node.tag));
    output.push_str("</span>");

    push_span(output, "ui-id", "#", node.attribute("id"), "");
    push_span(output, "ui-text", "\"", node.attribute("text"), "\"");
    push_span(output, "ui-desc", "@", node.attribute("description"), "");
    push_span(output, "ui-bounds", "", node.attribute("bounds"), "");
    output.push_str("</div>");

    let elements: Vec<&HierarchyNode> = node.elements().collect();
    if !elements.is_empty() {
        output.push_str("<ul>");
        for element in elements {
            render_node(element, node_index, output);
        }
        output.push_str("</ul>");
    }
    output.push_str("</li>");
}

fn push_span(output: &mut String, class: &str, open: &str, value: Option<&str>, close: &str) {
    let Some(value) = value.filter(|value| !value.is_empty()) else {
        return;
    };
    let _ = write!(
        output,
        " <span class=\"{class}\">{open}{}{close}</span>",
        escape_markup(value)
    );
}
