// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Allow std-y things to be used in test. Note that rust-analyzer tends to
// build with test set, which makes it easy to sneak in std dependencies
// without your editor complaining. Beware.
#![cfg_attr(not(test), no_std)]

//! Pure algorithms shared by the kernel's memory subsystem.
//!
//! These routines are kept free of kernel types and of any notion of a
//! machine so that they can be tested exhaustively on the host. The kernel
//! proper wraps them with the actual page table and physical memory access.

/// One contiguous piece of a virtual-memory transfer, confined to a single
/// page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageSpan {
    /// Virtual page the piece falls in.
    pub vpn: usize,
    /// Byte offset of the piece within that page.
    pub offset: usize,
    /// Length of the piece in bytes. Never zero, never crosses a page
    /// boundary.
    pub len: usize,
}

/// Plans a bounded transfer against a `num_pages`-page address space.
///
/// Yields the per-page pieces of the byte range `[vaddr, vaddr + len)`, in
/// ascending order, stopping early at the end of the address space. A range
/// that starts beyond the last page yields nothing, which is how the copy
/// routines implement "return however many bytes could be transferred".
///
/// # Panics
///
/// If `page_size` is zero.
pub fn page_spans(
    vaddr: usize,
    len: usize,
    page_size: usize,
    num_pages: usize,
) -> impl Iterator<Item = PageSpan> {
    assert!(page_size != 0);

    let mut vpn = vaddr / page_size;
    let mut offset = vaddr % page_size;
    let mut remaining = len;

    core::iter::from_fn(move || {
        if remaining == 0 || vpn >= num_pages {
            return None;
        }
        // Take what's left of the current page, or the rest of the request,
        // whichever ends first.
        let take = remaining.min(page_size - offset);
        let span = PageSpan {
            vpn,
            offset,
            len: take,
        };
        vpn += 1;
        offset = 0;
        remaining -= take;
        Some(span)
    })
}

/// Checks that the given `(first_vpn, num_pages)` section records tile the
/// bottom of an address space: each section must begin exactly where its
/// predecessor ended, and the first must begin at page 0.
///
/// Returns the total page count on success, `None` if the layout is
/// fragmented.
pub fn contiguous_page_count(
    sections: impl IntoIterator<Item = (usize, usize)>,
) -> Option<usize> {
    let mut total = 0;
    for (first_vpn, num_pages) in sections {
        if first_vpn != total {
            return None;
        }
        total += num_pages;
    }
    Some(total)
}

/// Computes the number of bytes the argument block occupies: one 32-bit
/// pointer per argument, then each argument's bytes plus a terminator.
/// `lens` yields the byte length of each argument, terminator excluded.
pub fn argv_footprint(lens: impl IntoIterator<Item = usize>) -> usize {
    lens.into_iter().map(|n| 4 + n + 1).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 1024;

    fn collect(vaddr: usize, len: usize, num_pages: usize) -> Vec<PageSpan> {
        page_spans(vaddr, len, PAGE, num_pages).collect()
    }

    #[test]
    fn empty_transfer_yields_nothing() {
        assert!(collect(100, 0, 4).is_empty());
    }

    #[test]
    fn transfer_within_one_page() {
        assert_eq!(
            collect(100, 24, 4),
            [PageSpan {
                vpn: 0,
                offset: 100,
                len: 24
            }],
        );
    }

    #[test]
    fn transfer_spanning_three_pages() {
        assert_eq!(
            collect(PAGE - 10, PAGE + 20, 4),
            [
                PageSpan {
                    vpn: 0,
                    offset: PAGE - 10,
                    len: 10
                },
                PageSpan {
                    vpn: 1,
                    offset: 0,
                    len: PAGE
                },
                PageSpan {
                    vpn: 2,
                    offset: 0,
                    len: 10
                },
            ],
        );
    }

    #[test]
    fn transfer_clamped_at_end_of_address_space() {
        // Starts 10 bytes before the last mapped page ends; only those 10
        // bytes are planned.
        assert_eq!(
            collect(3 * PAGE - 10, 20, 3),
            [PageSpan {
                vpn: 2,
                offset: PAGE - 10,
                len: 10
            }],
        );
    }

    #[test]
    fn transfer_starting_past_the_end_yields_nothing() {
        assert!(collect(5 * PAGE, 40, 4).is_empty());
        assert!(collect(4 * PAGE, 1, 4).is_empty());
    }

    #[test]
    fn transfer_ending_exactly_at_page_boundary() {
        assert_eq!(
            collect(PAGE + 24, PAGE - 24, 4),
            [PageSpan {
                vpn: 1,
                offset: 24,
                len: PAGE - 24
            }],
        );
    }

    #[test]
    fn contiguous_sections_accepted() {
        assert_eq!(contiguous_page_count([(0, 3), (3, 2), (5, 1)]), Some(6));
        assert_eq!(contiguous_page_count([]), Some(0));
    }

    #[test]
    fn fragmented_sections_rejected() {
        // Gap between sections.
        assert_eq!(contiguous_page_count([(0, 3), (4, 2)]), None);
        // Doesn't start at page zero.
        assert_eq!(contiguous_page_count([(1, 3)]), None);
        // Overlap.
        assert_eq!(contiguous_page_count([(0, 3), (2, 2)]), None);
    }

    #[test]
    fn argv_footprint_counts_pointers_and_terminators() {
        // No arguments: no pointers, no strings.
        assert_eq!(argv_footprint([]), 0);
        // "ab" and "c": two pointers, 3 string bytes, 2 terminators.
        assert_eq!(argv_footprint([2, 1]), 8 + 3 + 2);
        // An empty argument still costs a pointer and a terminator.
        assert_eq!(argv_footprint([0]), 5);
    }
}
