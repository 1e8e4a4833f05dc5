//! Locate nodes by GUID, UI name, or an arbitrary predicate.
//!
//! ## License
//!
//! Copyright (C) The uefikit Authors.
//!
//! SPDX-License-Identifier: BSD-3-Clause
//!

use std::rc::Rc;

use regex::Regex;

use uefikit_pi::fw_fs::ffs::file as raw_file;

use crate::err::FirmwareError;
use crate::tree::{Firmware, Visitor};
use crate::volume::FirmwareVolume;

/// A node filter for [`Find`].
pub type FindPredicate = Rc<dyn Fn(&Firmware) -> bool>;

/// Collects clones of every node the predicate accepts.
///
/// A UI section match is attributed to its enclosing file: the visitor
/// clones itself with the current file before descending, so a match on a
/// section name surfaces the file that carries it.
pub struct Find {
    pub predicate: FindPredicate,
    pub matches: Vec<Firmware>,
    current_file: Option<Box<Firmware>>,
}

impl Find {
    pub fn new(predicate: FindPredicate) -> Self {
        Find { predicate, matches: Vec::new(), current_file: None }
    }
}

impl Visitor for Find {
    fn visit(&mut self, node: &mut Firmware) -> Result<(), FirmwareError> {
        match node {
            Firmware::File(_) => {
                // Clone the visitor so `current_file` reaches only the
                // descendants of this file.
                let mut descend = Find {
                    predicate: Rc::clone(&self.predicate),
                    matches: Vec::new(),
                    current_file: Some(Box::new(node.clone())),
                };
                if (self.predicate)(node) {
                    self.matches.push(node.clone());
                    // already matched; don't match again via a descendant
                    descend.current_file = None;
                }
                node.apply_children(&mut descend)?;
                self.matches.append(&mut descend.matches);
                Ok(())
            }
            Firmware::Section(_) => {
                if self.current_file.is_some() && (self.predicate)(node) {
                    let file = self.current_file.take().expect("checked above");
                    self.matches.push(*file);
                }
                node.apply_children(self)
            }
            _ => {
                if (self.predicate)(node) {
                    self.matches.push(node.clone());
                }
                node.apply_children(self)
            }
        }
    }
}

/// Case-insensitive, anchored match over file GUIDs and UI section names.
pub fn file_predicate(pattern: &str) -> Result<FindPredicate, FirmwareError> {
    let regex = Regex::new(&format!("^(?i)({pattern})$"))
        .map_err(|err| FirmwareError::Other(format!("bad find pattern {pattern:?}: {err}")))?;
    Ok(Rc::new(move |node| match node {
        Firmware::File(file) => regex.is_match(&file.header.guid.to_string()),
        Firmware::Section(section) => !section.name.is_empty() && regex.is_match(&section.name),
        _ => false,
    }))
}

/// Match files of one FFS type.
pub fn file_type_predicate(file_type: u8) -> FindPredicate {
    Rc::new(move |node| {
        matches!(node, Firmware::File(file) if file.header.file_type == file_type)
    })
}

/// Run a find and insist on a single result.
pub fn find_exactly_one(
    root: &mut Firmware,
    predicate: FindPredicate,
) -> Result<Firmware, FirmwareError> {
    let mut find = Find::new(predicate);
    find.run(root)?;
    if find.matches.len() != 1 {
        return Err(FirmwareError::Other(format!(
            "expected exactly one match, got {}",
            find.matches.len()
        )));
    }
    Ok(find.matches.remove(0))
}

/// The firmware volume that holds the DXE core. Images with several DXE
/// volumes make this ambiguous, which surfaces as an error; the core
/// parsers never rely on this helper.
pub fn find_dxe_fv(root: &mut Firmware) -> Result<FirmwareVolume, FirmwareError> {
    let predicate: FindPredicate = Rc::new(|node| match node {
        Firmware::FirmwareVolume(volume) => volume.files.iter().any(|child| {
            matches!(child, Firmware::File(file) if file.header.file_type == raw_file::r#type::DXE_CORE)
        }),
        _ => false,
    });
    match find_exactly_one(root, predicate)? {
        Firmware::FirmwareVolume(volume) => Ok(volume),
        _ => Err(FirmwareError::Other("DXE volume match was not a firmware volume".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FfsFile;
    use crate::section::{utf8_to_ucs2, Section};
    use uefikit_pi::fw_fs::ffs::section as raw_section;
    use uefikit_pi::fw_fs::fv;
    use uefikit_pi::Guid;

    fn sample_tree() -> Firmware {
        let mut volume = FirmwareVolume::new(fv::guid::FFS3, 0);
        let dxe_guid: Guid = "D6A2CB7F-6A18-4E2F-B43B-9920A733700A".parse().unwrap();
        let mut dxe = FfsFile::new(dxe_guid, raw_file::r#type::DXE_CORE);
        let mut ui = Section::new(raw_section::raw_type::USER_INTERFACE, utf8_to_ucs2("DxeMain"));
        ui.name = "DxeMain".to_string();
        dxe.sections.push(Firmware::Section(ui));
        volume.files.push(Firmware::File(dxe));
        let driver_guid: Guid = "378D7B65-8DA9-4773-B6E4-A47826A833E1".parse().unwrap();
        volume.files.push(Firmware::File(FfsFile::new(driver_guid, raw_file::r#type::DRIVER)));
        Firmware::FirmwareVolume(volume)
    }

    #[test]
    fn finds_files_by_guid_pattern() {
        let mut root = sample_tree();
        let mut find = Find::new(file_predicate("378d7b65-.*").unwrap());
        find.run(&mut root).unwrap();
        assert_eq!(find.matches.len(), 1);
        assert!(matches!(&find.matches[0], Firmware::File(f) if f.type_name.contains("DRIVER")));
    }

    #[test]
    fn ui_name_match_surfaces_the_enclosing_file() {
        let mut root = sample_tree();
        let mut find = Find::new(file_predicate("DxeMain").unwrap());
        find.run(&mut root).unwrap();
        assert_eq!(find.matches.len(), 1);
        assert!(matches!(&find.matches[0], Firmware::File(f) if f.header.file_type == raw_file::r#type::DXE_CORE));
    }

    #[test]
    fn file_type_predicate_and_dxe_fv_helper() {
        let mut root = sample_tree();
        let matched =
            find_exactly_one(&mut root, file_type_predicate(raw_file::r#type::DXE_CORE)).unwrap();
        assert!(matches!(matched, Firmware::File(_)));
        let volume = find_dxe_fv(&mut root).unwrap();
        assert_eq!(volume.files.len(), 2);
    }

    #[test]
    fn bad_pattern_reports_an_error() {
        assert!(file_predicate("(unclosed").is_err());
    }
}
