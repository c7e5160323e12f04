// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel, the machine simulator,
//! and user programs.

#![no_std]

use zerocopy::{AsBytes, FromBytes};

/// Simulated processor register file layout. The numbering follows the
/// MIPS o32 convention for the general-purpose registers, with the special
/// registers appended after the GPRs.
pub mod regs {
    /// Total number of registers visible to user programs.
    pub const NUM_USER_REGISTERS: usize = 38;

    /// First return-value register; also carries the syscall number on trap
    /// entry.
    pub const V0: usize = 2;
    pub const V1: usize = 3;
    /// Argument registers. A0 carries `argc` at process start.
    pub const A0: usize = 4;
    pub const A1: usize = 5;
    pub const A2: usize = 6;
    pub const A3: usize = 7;
    /// Stack pointer.
    pub const SP: usize = 29;
    pub const RA: usize = 31;
    pub const LO: usize = 32;
    pub const HI: usize = 33;
    /// Program counter and its delay-slot successor.
    pub const PC: usize = 34;
    pub const NEXT_PC: usize = 35;
    /// Faulting address for memory exceptions.
    pub const BAD_VADDR: usize = 36;
    /// Cause of the most recent trap; see [`super::ExceptionCause`].
    pub const CAUSE: usize = 37;
}

/// Maximum length, in bytes, of a string passed across the syscall boundary
/// (executable names, file names, argv entries). The terminator is not
/// counted.
pub const MAX_STR_LEN: usize = 256;

/// Number of slots in a process's file descriptor table, including the two
/// console endpoints.
pub const MAX_OPEN_FILES: usize = 16;

/// File descriptor reserved for console input.
pub const FD_STDIN: i32 = 0;

/// File descriptor reserved for console output.
pub const FD_STDOUT: i32 = 1;

/// Names a process.
///
/// Pids are issued monotonically starting from 1 and are never reused; the
/// first process created is [`Pid::ROOT`]. [`Pid::NONE`] is not a real
/// process: it stands for "no live parent" in the parent/child relation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Pid(pub i32);

impl Pid {
    /// The process allowed to halt the machine.
    pub const ROOT: Self = Self(1);
    /// Stands for the absence of a process, e.g. a disowned child's parent.
    pub const NONE: Self = Self(0);
}

impl From<Pid> for i32 {
    fn from(p: Pid) -> Self {
        p.0
    }
}

/// One entry of a process page table, mapping a virtual page to a physical
/// frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TranslationEntry {
    /// Virtual page number. For a live process this always equals the entry's
    /// index in the page table.
    pub vpn: u32,
    /// Physical page number backing `vpn`.
    pub ppn: u32,
    /// Entry may be used for translation. Cleared on address space teardown.
    pub valid: bool,
    /// Stores through this entry must be refused.
    pub read_only: bool,
    /// Set by the kernel whenever the entry is consulted for a transfer.
    pub used: bool,
    /// Set by the kernel whenever data is written through the entry.
    pub dirty: bool,
}

impl TranslationEntry {
    /// An invalid entry, the state before load assigns frames and after
    /// teardown returns them.
    pub const fn invalid() -> Self {
        Self {
            vpn: 0,
            ppn: 0,
            valid: false,
            read_only: false,
            used: false,
            dirty: false,
        }
    }
}

/// Causes the processor can report on kernel entry, in the cause register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ExceptionCause {
    Syscall = 0,
    PageFault = 1,
    TlbMiss = 2,
    ReadOnly = 3,
    BusError = 4,
    AddressError = 5,
    Overflow = 6,
    IllegalInstruction = 7,
}

/// We're using an explicit `TryFrom` impl instead of `FromPrimitive` because
/// the kernel doesn't depend on `num-traits` and this seems okay.
impl core::convert::TryFrom<i32> for ExceptionCause {
    type Error = ();

    fn try_from(x: i32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Syscall),
            1 => Ok(Self::PageFault),
            2 => Ok(Self::TlbMiss),
            3 => Ok(Self::ReadOnly),
            4 => Ok(Self::BusError),
            5 => Ok(Self::AddressError),
            6 => Ok(Self::Overflow),
            7 => Ok(Self::IllegalInstruction),
            _ => Err(()),
        }
    }
}

/// Enumeration of syscall numbers. The number arrives in `regs::V0`; up to
/// four arguments arrive in `regs::A0..=A3`; the result is written back to
/// `regs::V0`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Join = 3,
    Creat = 4,
    Open = 5,
    Read = 6,
    Write = 7,
    Close = 8,
    Unlink = 9,
}

/// Explicit `TryFrom` for the same reason as [`ExceptionCause`].
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Halt),
            1 => Ok(Self::Exit),
            2 => Ok(Self::Exec),
            3 => Ok(Self::Join),
            4 => Ok(Self::Creat),
            5 => Ok(Self::Open),
            6 => Ok(Self::Read),
            7 => Ok(Self::Write),
            8 => Ok(Self::Close),
            9 => Ok(Self::Unlink),
            _ => Err(()),
        }
    }
}

/// Magic number that appears at the start of an executable image to reassure
/// the loader that it is not reading garbage. ("MNO1")
pub const IMAGE_MAGIC: u32 = 0x4D4E_4F31;

/// Executable image header. All fields little-endian; the simulated machine
/// is little-endian throughout.
///
/// `num_sections` [`SectionHeader`] records follow the header, then the
/// section contents in section order, each occupying exactly
/// `num_pages * page_size` bytes.
#[derive(Copy, Clone, Debug, Default, FromBytes, AsBytes)]
#[repr(C)]
pub struct ImageHeader {
    /// Should have the value [`IMAGE_MAGIC`].
    pub magic: u32,
    /// Virtual address of the first instruction to execute.
    pub entry_point: u32,
    /// Number of `SectionHeader` records following this header.
    pub num_sections: u32,
}

/// Descriptor for one section of an executable image.
#[derive(Copy, Clone, Debug, Default, FromBytes, AsBytes)]
#[repr(C)]
pub struct SectionHeader {
    /// First virtual page occupied by this section. Sections must tile the
    /// address space contiguously from page 0.
    pub first_vpn: u32,
    /// Length of the section in pages.
    pub num_pages: u32,
    /// Raw [`SectionFlags`] bits.
    pub flags: u32,
}

impl SectionHeader {
    pub fn section_flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.flags)
    }
}

bitflags::bitflags! {
    /// Permission bits of an image section.
    pub struct SectionFlags: u32 {
        /// Pages of this section are mapped read-only.
        const READ_ONLY = 1 << 0;
    }
}
