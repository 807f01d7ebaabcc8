//! XML helpers shared by the request, response and transaction modules.

mod fragment;
mod utils;

pub use fragment::standalone_fragment;
pub(crate) use fragment::start_tag_end;
pub use utils::{
    character_string, element_children, escape_xml, find_all_by_path, find_by_path, find_child,
    find_children, find_descendant, find_descendants, get_attribute, get_deep_text, get_tag_name,
    get_text, has_tag, numeric_attribute, strip_xml_declaration, text_at,
};
