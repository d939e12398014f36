// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use std::cmp::Ordering;

use thiserror::Error;

/// Page size that disables paging.
pub const PAGE_SIZE_ALL: usize = 0;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no more pages")]
pub struct NoMorePages;

/// In-memory paging over an already loaded result set.
#[derive(Debug, Clone)]
pub struct Paginator<T> {
    elements: Vec<T>,
    page_size: usize,
}

impl<T> Paginator<T> {
    pub fn new(elements: Vec<T>) -> Self {
        Self { elements, page_size: PAGE_SIZE_ALL }
    }

    pub fn size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn sort_by(mut self, compare: impl FnMut(&T, &T) -> Ordering) -> Self {
        self.elements.sort_by(compare);
        self
    }

    /// The page starting at `offset`. An offset past the end is an error,
    /// except for the first page of an empty set.
    pub fn paginate(self, offset: usize) -> Result<Vec<T>, NoMorePages> {
        if self.page_size == PAGE_SIZE_ALL {
            return Ok(self.elements);
        }
        if offset > 0 && offset >= self.elements.len() {
            return Err(NoMorePages);
        }
        Ok(self
            .elements
            .into_iter()
            .skip(offset)
            .take(self.page_size)
            .collect())
    }
}
