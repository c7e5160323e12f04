// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The executable image format and its loader.
//!
//! See `abi::ImageHeader` for the layout: a little-endian header, one
//! descriptor per section, then each section's contents padded to whole
//! pages. [`ImageBuilder`] assembles images for tests, and by convention
//! the entry point addresses a NUL-terminated *program key* naming the
//! registered behavior; see `cpu`.

use std::mem::size_of;
use std::sync::Arc;

use zerocopy::FromBytes;

use abi::{ImageHeader, SectionFlags, SectionHeader, IMAGE_MAGIC};
use kern::err::LoadError;
use kern::machine::{ImageLoader, ObjectImage, OpenFile, Processor, SectionInfo};

use crate::cpu::SimProcessor;

/// Cap on sections per image; anything larger is a corrupt header.
const MAX_SECTIONS: usize = 16;

/// Cap on pages per section, likewise.
const MAX_SECTION_PAGES: usize = 4096;

/// Parses executable images for the kernel.
pub struct SimLoader {
    cpu: Arc<SimProcessor>,
}

impl SimLoader {
    pub fn new(cpu: Arc<SimProcessor>) -> Arc<Self> {
        Arc::new(Self { cpu })
    }
}

impl ImageLoader for SimLoader {
    fn parse(
        &self,
        file: Box<dyn OpenFile>,
    ) -> Result<Box<dyn ObjectImage>, LoadError> {
        let page_size = self.cpu.page_size();

        let mut raw = [0u8; size_of::<ImageHeader>()];
        let got =
            file.read_at(0, &mut raw).map_err(|_| LoadError::BadImage)?;
        if got < raw.len() {
            return Err(LoadError::BadImage);
        }
        let header =
            ImageHeader::read_from(&raw[..]).ok_or(LoadError::BadImage)?;
        if header.magic != IMAGE_MAGIC {
            return Err(LoadError::BadImage);
        }
        let num_sections = header.num_sections as usize;
        if num_sections > MAX_SECTIONS {
            return Err(LoadError::BadImage);
        }

        let mut sections = Vec::with_capacity(num_sections);
        let mut data_offsets = Vec::with_capacity(num_sections);
        let mut offset =
            size_of::<ImageHeader>() + num_sections * size_of::<SectionHeader>();
        for index in 0..num_sections {
            let mut raw = [0u8; size_of::<SectionHeader>()];
            let at = size_of::<ImageHeader>() + index * raw.len();
            let got =
                file.read_at(at, &mut raw).map_err(|_| LoadError::BadImage)?;
            if got < raw.len() {
                return Err(LoadError::BadImage);
            }
            let section = SectionHeader::read_from(&raw[..])
                .ok_or(LoadError::BadImage)?;
            let num_pages = section.num_pages as usize;
            if num_pages > MAX_SECTION_PAGES {
                return Err(LoadError::BadImage);
            }
            sections.push(SectionInfo {
                name: format!("section{index}"),
                first_vpn: section.first_vpn as usize,
                num_pages,
                read_only: section
                    .section_flags()
                    .contains(SectionFlags::READ_ONLY),
            });
            data_offsets.push(offset);
            offset += num_pages * page_size;
        }

        Ok(Box::new(SimImage {
            file,
            sections,
            data_offsets,
            entry_point: header.entry_point,
            page_size,
            cpu: Arc::clone(&self.cpu),
        }))
    }
}

struct SimImage {
    file: Box<dyn OpenFile>,
    sections: Vec<SectionInfo>,
    data_offsets: Vec<usize>,
    entry_point: u32,
    page_size: usize,
    cpu: Arc<SimProcessor>,
}

impl ObjectImage for SimImage {
    fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    fn entry_point(&self) -> u32 {
        self.entry_point
    }

    fn load_page(
        &self,
        section: usize,
        page: usize,
        ppn: u32,
    ) -> Result<(), LoadError> {
        let offset = self.data_offsets[section] + page * self.page_size;
        let mut buf = vec![0u8; self.page_size];
        let got = self
            .file
            .read_at(offset, &mut buf)
            .map_err(|_| LoadError::BadImage)?;
        if got < buf.len() {
            // Section contents must occupy whole pages; a short read means
            // the file was truncated.
            return Err(LoadError::BadImage);
        }
        self.cpu
            .write_phys(ppn as usize * self.page_size, &buf);
        Ok(())
    }
}

struct BuiltSection {
    read_only: bool,
    pages: usize,
    data: Vec<u8>,
}

/// Assembles executable images.
pub struct ImageBuilder {
    page_size: usize,
    entry_point: u32,
    sections: Vec<BuiltSection>,
}

impl ImageBuilder {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            entry_point: 0,
            sections: Vec::new(),
        }
    }

    pub fn entry_point(mut self, addr: u32) -> Self {
        self.entry_point = addr;
        self
    }

    /// Appends a section sized to hold `data` (at least one page).
    pub fn section(self, read_only: bool, data: &[u8]) -> Self {
        let pages = 1.max((data.len() + self.page_size - 1) / self.page_size);
        self.section_pages(read_only, data, pages)
    }

    /// Appends a section of exactly `pages` pages, zero-padded past
    /// `data`.
    ///
    /// # Panics
    ///
    /// If `data` does not fit in `pages` pages.
    pub fn section_pages(
        mut self,
        read_only: bool,
        data: &[u8],
        pages: usize,
    ) -> Self {
        assert!(data.len() <= pages * self.page_size);
        self.sections.push(BuiltSection {
            read_only,
            pages,
            data: data.to_vec(),
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        use zerocopy::AsBytes;

        let header = ImageHeader {
            magic: IMAGE_MAGIC,
            entry_point: self.entry_point,
            num_sections: self.sections.len() as u32,
        };
        let mut out = header.as_bytes().to_vec();

        let mut first_vpn = 0u32;
        for section in &self.sections {
            let flags = if section.read_only {
                SectionFlags::READ_ONLY.bits()
            } else {
                SectionFlags::empty().bits()
            };
            let descriptor = SectionHeader {
                first_vpn,
                num_pages: section.pages as u32,
                flags,
            };
            out.extend_from_slice(descriptor.as_bytes());
            first_vpn += section.pages as u32;
        }
        for section in &self.sections {
            out.extend_from_slice(&section.data);
            let padded = section.pages * self.page_size;
            out.resize(out.len() + padded - section.data.len(), 0);
        }
        out
    }
}

/// Builds the standard one-section image for a behavior-backed program:
/// a read-only text page whose first bytes are `key` NUL-terminated, with
/// the entry point addressing it.
pub fn key_program(page_size: usize, key: &str) -> Vec<u8> {
    let mut text = key.as_bytes().to_vec();
    text.push(0);
    ImageBuilder::new(page_size).section(true, &text).build()
}
