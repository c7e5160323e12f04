// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Address-space construction and the user-memory copy routines, exercised
//! directly against the simulated machine (no processes involved).

mod common;

use kern::err::LoadError;
use kern::machine::Machine;
use kern::mem::frames::FrameAllocator;
use kern::mem::space::AddressSpace;
use kern::proc::process::ops_for_kind;
use sim::{ImageBuilder, SimConfig, SimMachine};

const PAGE: usize = 1024;
const STACK_PAGES: usize = 8;

struct Rig {
    sim: SimMachine,
    machine: Machine,
    frames: FrameAllocator,
}

impl Rig {
    fn new(num_phys_pages: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let sim = SimMachine::new(SimConfig {
            page_size: PAGE,
            num_phys_pages,
            timer_period: 500,
        });
        let machine = sim.machine();
        let frames = FrameAllocator::new(num_phys_pages);
        Self {
            sim,
            machine,
            frames,
        }
    }

    fn load(
        &self,
        name: &str,
        args: &[String],
    ) -> Result<AddressSpace, LoadError> {
        let ops = ops_for_kind("base").unwrap();
        AddressSpace::load(
            &self.machine,
            &self.frames,
            &*ops,
            name,
            args,
            STACK_PAGES,
        )
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[test]
fn load_lays_out_image_stack_and_argv() {
    let rig = Rig::new(64);
    rig.sim
        .install_image("prog.mno", ImageBuilder::new(PAGE).section(true, b"prog\0").build());

    let space = rig.load("prog.mno", &strings(&["ab", "c"])).unwrap();

    assert_eq!(space.num_pages(), 1 + STACK_PAGES + 1);
    assert_eq!(space.initial_pc(), 0);
    assert_eq!(space.initial_sp(), (9 * PAGE) as i32);
    assert_eq!(space.argc(), 2);
    assert_eq!(space.argv_addr(), space.initial_sp());

    // Page table invariants: entry v maps v, all valid, distinct frames.
    let table = space.page_table();
    let mut seen = std::collections::HashSet::new();
    for vpn in 0..space.num_pages() {
        let entry = table.entry(vpn);
        assert!(entry.valid);
        assert_eq!(entry.vpn as usize, vpn);
        assert!(seen.insert(entry.ppn));
    }
    assert_eq!(
        rig.frames.free_count() + space.num_pages(),
        64,
        "every frame is either free or owned by the space"
    );

    // Argument page: two little-endian pointers, then the strings.
    let argv = space.argv_addr();
    let mut raw = [0u8; 13];
    assert_eq!(space.read_virtual(argv, &mut raw), raw.len());
    let ptr0 = i32::from_le_bytes(raw[0..4].try_into().unwrap());
    let ptr1 = i32::from_le_bytes(raw[4..8].try_into().unwrap());
    assert_eq!(ptr0, argv + 8);
    assert_eq!(ptr1, argv + 11);
    assert_eq!(&raw[8..13], b"ab\0c\0");
    assert_eq!(space.read_string(ptr0, 256).as_deref(), Some("ab"));
    assert_eq!(space.read_string(ptr1, 256).as_deref(), Some("c"));

    space.release_frames_for_test(&rig.frames);
}

// Keep the helper call above honest: releasing through the ops bundle is
// what the kernel does, so that's what the rest of the tests use.
trait ReleaseForTest {
    fn release_frames_for_test(&self, frames: &FrameAllocator);
}

impl ReleaseForTest for AddressSpace {
    fn release_frames_for_test(&self, frames: &FrameAllocator) {
        ops_for_kind("base").unwrap().unload_sections(self, frames);
    }
}

#[test]
fn copy_round_trips_across_pages() {
    let rig = Rig::new(64);
    rig.sim
        .install_image("prog.mno", ImageBuilder::new(PAGE).section(true, b"prog\0").build());
    let space = rig.load("prog.mno", &[]).unwrap();

    // Write into the stack region, spanning three pages.
    let base = (2 * PAGE - 100) as i32;
    let data: Vec<u8> = (0..2200u32).map(|i| i as u8).collect();
    assert_eq!(space.write_virtual(base, &data), data.len());

    let mut back = vec![0u8; data.len()];
    assert_eq!(space.read_virtual(base, &mut back), back.len());
    assert_eq!(back, data);

    // The walk left its footprints in the entries.
    let table = space.page_table();
    assert!(table.entry(1).used && table.entry(1).dirty);
    assert!(table.entry(2).used && table.entry(2).dirty);

    space.release_frames_for_test(&rig.frames);
}

#[test]
fn write_stops_at_read_only_page() {
    let rig = Rig::new(64);
    // Three writable pages, then a read-only page at vpn 3.
    let image = ImageBuilder::new(PAGE)
        .section_pages(false, b"prog\0", 3)
        .section_pages(true, &[], 1)
        .build();
    rig.sim.install_image("prog.mno", image);
    let space = rig.load("prog.mno", &[]).unwrap();

    let data = [0xAAu8; 20];
    // Straddles the boundary: ten writable bytes, then refusal.
    assert_eq!(space.write_virtual((3 * PAGE - 10) as i32, &data), 10);
    // Starting on the read-only page transfers nothing.
    assert_eq!(space.write_virtual((3 * PAGE) as i32, &data), 0);
    // Reads are unaffected by write protection.
    let mut buf = [0u8; 20];
    assert_eq!(space.read_virtual((3 * PAGE - 10) as i32, &mut buf), 20);

    space.release_frames_for_test(&rig.frames);
}

#[test]
fn copies_clamp_to_the_address_space() {
    let rig = Rig::new(64);
    rig.sim
        .install_image("prog.mno", ImageBuilder::new(PAGE).section(true, b"prog\0").build());
    let space = rig.load("prog.mno", &[]).unwrap();
    let top = (space.num_pages() * PAGE) as i32;

    let mut buf = [0u8; 64];
    assert_eq!(space.read_virtual(top, &mut buf), 0);
    assert_eq!(space.read_virtual(top + 5000, &mut buf), 0);
    assert_eq!(space.read_virtual(-4, &mut buf), 0);
    assert_eq!(space.write_virtual(top, &buf), 0);

    // A transfer that starts in bounds is trimmed, not rejected.
    assert_eq!(space.read_virtual(top - 10, &mut buf), 10);
    assert_eq!(space.write_virtual(top - 10, &buf), 10);
    let mut empty: [u8; 0] = [];
    assert_eq!(space.read_virtual(top - 10, &mut empty), 0);

    space.release_frames_for_test(&rig.frames);
}

#[test]
fn string_reads_distinguish_missing_terminators() {
    let rig = Rig::new(64);
    rig.sim
        .install_image("prog.mno", ImageBuilder::new(PAGE).section(true, b"prog\0").build());
    let space = rig.load("prog.mno", &[]).unwrap();
    let scratch = (PAGE + 32) as i32;

    space.write_virtual(scratch, b"hello\0trailing");
    assert_eq!(space.read_string(scratch, 256).as_deref(), Some("hello"));

    // Empty string is a found terminator, not a failure.
    space.write_virtual(scratch, b"\0");
    assert_eq!(space.read_string(scratch, 256).as_deref(), Some(""));

    // No terminator inside the window.
    space.write_virtual(scratch, &[b'x'; 64]);
    assert_eq!(space.read_string(scratch, 32), None);

    space.release_frames_for_test(&rig.frames);
}

#[test]
fn load_rejects_bad_images() {
    let rig = Rig::new(64);

    assert_eq!(
        rig.load("absent.mno", &[]).unwrap_err(),
        LoadError::NotFound
    );

    rig.sim.install_image("trunc.mno", vec![1, 2, 3]);
    assert_eq!(rig.load("trunc.mno", &[]).unwrap_err(), LoadError::BadImage);

    let mut bad_magic =
        ImageBuilder::new(PAGE).section(true, b"prog\0").build();
    bad_magic[0] ^= 0xFF;
    rig.sim.install_image("magic.mno", bad_magic);
    assert_eq!(rig.load("magic.mno", &[]).unwrap_err(), LoadError::BadImage);

    // Patch the single section's first_vpn to 1: no longer tiles from 0.
    let mut gapped = ImageBuilder::new(PAGE).section(true, b"prog\0").build();
    gapped[12..16].copy_from_slice(&1u32.to_le_bytes());
    rig.sim.install_image("gap.mno", gapped);
    assert_eq!(
        rig.load("gap.mno", &[]).unwrap_err(),
        LoadError::Fragmented
    );

    // Every rejection left the frame pool untouched.
    assert_eq!(rig.frames.free_count(), 64);
}

#[test]
fn load_rejects_oversized_argv() {
    let rig = Rig::new(64);
    rig.sim
        .install_image("prog.mno", ImageBuilder::new(PAGE).section(true, b"prog\0").build());

    let big = "x".repeat(300);
    let args = strings(&[&big, &big, &big, &big]);
    assert_eq!(
        rig.load("prog.mno", &args).unwrap_err(),
        LoadError::ArgumentsTooLong
    );
    // Just-fits goes through: 3 * (4 + 300 + 1) = 915 bytes.
    let args = strings(&[&big, &big, &big]);
    let space = rig.load("prog.mno", &args).unwrap();
    space.release_frames_for_test(&rig.frames);
    assert_eq!(rig.frames.free_count(), 64);
}

#[test]
fn load_out_of_frames_releases_everything() {
    // Space needs 1 + 8 + 1 = 10 pages; give the machine 8.
    let rig = Rig::new(8);
    rig.sim
        .install_image("prog.mno", ImageBuilder::new(PAGE).section(true, b"prog\0").build());

    assert_eq!(
        rig.load("prog.mno", &[]).unwrap_err(),
        LoadError::OutOfMemory
    );
    assert_eq!(rig.frames.free_count(), 8);
}

#[test]
fn teardown_returns_frames_and_invalidates() {
    let rig = Rig::new(64);
    rig.sim
        .install_image("prog.mno", ImageBuilder::new(PAGE).section(true, b"prog\0").build());
    let space = rig.load("prog.mno", &[]).unwrap();
    assert_eq!(rig.frames.free_count(), 64 - space.num_pages());

    space.release_frames_for_test(&rig.frames);
    assert_eq!(rig.frames.free_count(), 64);
    for vpn in 0..space.num_pages() {
        assert!(!space.page_table().entry(vpn).valid);
    }
}
