// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Buffers used to lay out kernel structures and ancillary records byte by byte.
//!
//! Every structure handed to the kernel is serialized field-by-field into one of these buffers at
//! explicit offsets rather than reinterpreted in place. Host-sized integers (interface indices,
//! address families on most platforms) are written in native byte order; protocol fields such as
//! ports and addresses are written in network byte order.

#![forbid(unsafe_code)]

use core::array;

/// A fixed-capacity buffer that is filled from the front.
#[derive(Clone, Debug)]
pub struct Buffer<T: Copy, const N: usize> {
    buf: [T; N],
    buf_len: usize,
}

impl<T: Copy + Default, const N: usize> Buffer<T, N> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.buf[..self.buf_len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.buf[..self.buf_len]
    }

    /// Appends the provided items to the buffer, panicking if insufficient space is available in
    /// the buffer.
    #[inline]
    pub fn append(&mut self, slice: &[T]) {
        self.buf[self.buf_len..self.buf_len + slice.len()].copy_from_slice(slice);
        self.buf_len += slice.len();
    }

    /// Appends the provided items to the buffer, returning `None` if insufficient space is
    /// available.
    #[inline]
    pub fn try_append(&mut self, slice: &[T]) -> Option<()> {
        if self.remaining() < slice.len() {
            return None;
        }
        self.append(slice);
        Some(())
    }

    /// Truncates the buffer to the specified position.
    pub fn truncate(&mut self, pos: usize) {
        assert!(self.buf_len >= pos);
        self.buf_len = pos;
    }

    #[inline]
    pub fn into_parts(self) -> ([T; N], usize) {
        (self.buf, self.buf_len)
    }

    /// The length of the stored buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf_len == 0
    }

    /// The number of unused slots in the buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        N - self.buf_len
    }

    /// The total capacity of the buffer.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Copy + Default, const N: usize> Default for Buffer<T, N> {
    #[inline]
    fn default() -> Self {
        Self {
            buf: array::from_fn(|_| T::default()),
            buf_len: 0,
        }
    }
}

/// A byte writer over a borrowed slice.
#[derive(Debug)]
pub struct BufferMut<'a> {
    buf: &'a mut [u8],
    buf_len: usize,
}

impl<'a> BufferMut<'a> {
    #[inline]
    pub fn new(slice: &'a mut [u8]) -> Self {
        Self {
            buf: slice,
            buf_len: 0,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.buf_len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.buf_len]
    }

    /// Appends the provided bytes to the buffer, panicking if insufficient space is available in
    /// the buffer.
    #[inline]
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf[self.buf_len..self.buf_len + bytes.len()].copy_from_slice(bytes);
        self.buf_len += bytes.len();
    }

    /// Appends the provided bytes to the buffer, returning `error` if insufficient space is
    /// available in the buffer.
    #[inline]
    pub fn append_or<T>(&mut self, bytes: &[u8], error: T) -> Result<(), T> {
        let buf_slice = self
            .buf
            .get_mut(self.buf_len..self.buf_len + bytes.len())
            .ok_or(error)?;
        buf_slice.copy_from_slice(bytes);
        self.buf_len += bytes.len();
        Ok(())
    }

    /// Appends the provided bytes to the buffer, returning `None` if insufficient space is
    /// available in the buffer.
    #[inline]
    pub fn try_append(&mut self, bytes: &[u8]) -> Option<()> {
        if self.remaining() < bytes.len() {
            return None;
        }
        self.append(bytes);
        Some(())
    }

    /// Truncates the buffer to the specified position.
    pub fn truncate(&mut self, pos: usize) {
        assert!(self.buf_len >= pos);
        self.buf_len = pos;
    }

    #[inline]
    pub fn into_mut_slice(self) -> &'a mut [u8] {
        &mut self.buf[..self.buf_len]
    }

    /// The length of the written portion of the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf_len == 0
    }

    /// The number of unused bytes in the buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.buf_len
    }
}

// Typed appends shared by both byte buffers. All of them panic when the buffer is full, same as
// `append()`.
macro_rules! typed_appends {
    ($($t:ty),*) => {
        $(
        impl $t {
            /// Appends `count` zero bytes.
            #[inline]
            pub fn append_zeros(&mut self, count: usize) {
                for _ in 0..count {
                    self.append(&[0]);
                }
            }

            /// Appends zero bytes until the written length is a multiple of `align`.
            #[inline]
            pub fn align_to(&mut self, align: usize) {
                let rem = self.len() % align;
                if rem != 0 {
                    self.append_zeros(align - rem);
                }
            }

            /// Appends zero bytes until the written length reaches `len`.
            #[inline]
            pub fn pad_to(&mut self, len: usize) {
                if self.len() < len {
                    self.append_zeros(len - self.len());
                }
            }

            #[inline]
            pub fn append_u8(&mut self, value: u8) {
                self.append(&[value]);
            }

            #[inline]
            pub fn append_ne_u16(&mut self, value: u16) {
                self.append(&value.to_ne_bytes());
            }

            #[inline]
            pub fn append_ne_u32(&mut self, value: u32) {
                self.append(&value.to_ne_bytes());
            }

            #[inline]
            pub fn append_ne_i32(&mut self, value: i32) {
                self.append(&value.to_ne_bytes());
            }

            #[inline]
            pub fn append_be_u16(&mut self, value: u16) {
                self.append(&value.to_be_bytes());
            }

            #[inline]
            pub fn append_be_u32(&mut self, value: u32) {
                self.append(&value.to_be_bytes());
            }
        }
        )*
    };
}

typed_appends!(BufferMut<'_>);

impl<const N: usize> Buffer<u8, N> {
    /// Appends `count` zero bytes.
    #[inline]
    pub fn append_zeros(&mut self, count: usize) {
        let start = self.buf_len;
        self.buf[start..start + count].fill(0);
        self.buf_len += count;
    }

    #[inline]
    pub fn append_u8(&mut self, value: u8) {
        self.append(&[value]);
    }

    #[inline]
    pub fn append_ne_u16(&mut self, value: u16) {
        self.append(&value.to_ne_bytes());
    }

    #[inline]
    pub fn append_ne_u32(&mut self, value: u32) {
        self.append(&value.to_ne_bytes());
    }

    #[inline]
    pub fn append_be_u16(&mut self, value: u16) {
        self.append(&value.to_be_bytes());
    }

    #[inline]
    pub fn append_be_u32(&mut self, value: u32) {
        self.append(&value.to_be_bytes());
    }

    /// Appends zero bytes until the written length reaches `len`.
    #[inline]
    pub fn pad_to(&mut self, len: usize) {
        if self.buf_len < len {
            self.append_zeros(len - self.buf_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_appends_lay_out_fields() {
        let mut storage = [0xFFu8; 12];
        let mut buf = BufferMut::new(&mut storage);
        buf.append_u8(1);
        buf.align_to(4);
        buf.append_be_u16(0x0102);
        buf.append_ne_u16(7);
        buf.pad_to(12);

        assert_eq!(buf.len(), 12);
        assert_eq!(&buf.as_slice()[..6], &[1, 0, 0, 0, 1, 2]);
        assert_eq!(&buf.as_slice()[6..8], &7u16.to_ne_bytes());
        assert_eq!(&buf.as_slice()[8..], &[0, 0, 0, 0]);
    }

    #[test]
    fn append_or_reports_overflow() {
        let mut storage = [0u8; 2];
        let mut buf = BufferMut::new(&mut storage);
        assert_eq!(buf.append_or(&[1, 2, 3], "full"), Err("full"));
        assert!(buf.is_empty());
        assert!(buf.try_append(&[1, 2]).is_some());
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn fixed_buffer_pads() {
        let mut buf = Buffer::<u8, 16>::new();
        buf.append_u8(28);
        buf.append_u8(28);
        buf.append_be_u16(0);
        buf.pad_to(16);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.remaining(), 0);
        assert_eq!(buf.as_slice()[0], 28);
        assert!(buf.try_append(&[0]).is_none());
    }
}
