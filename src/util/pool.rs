// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! A generic object pool for reusing heap buffers across span lifecycles.
//!
//! Lifted nearly verbatim from `minitrace::util::object_pool` — the shape
//! (init/reset function pointers, a `parking_lot::Mutex<Vec<T>>` free list,
//! a `Reusable` guard that recycles on drop) is exactly what the capture
//! buffers and attribute vectors in this crate need too, so the pool is
//! generalized rather than reimplemented per call site.

use parking_lot::Mutex;
use std::mem::{forget, ManuallyDrop};
use std::ops::{Deref, DerefMut};

pub struct Pool<T> {
    objects: Mutex<Vec<T>>,
    init: fn() -> T,
    reset: fn(&mut T),
}

impl<T> Pool<T> {
    #[inline]
    pub fn new(init: fn() -> T, reset: fn(&mut T)) -> Pool<T> {
        Pool {
            objects: Mutex::new(Vec::new()),
            init,
            reset,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    #[inline]
    pub fn pull(&self) -> Reusable<'_, T> {
        self.objects
            .lock()
            .pop()
            .map(|mut obj| {
                (self.reset)(&mut obj);
                Reusable::new(self, obj)
            })
            .unwrap_or_else(|| Reusable::new(self, (self.init)()))
    }

    #[inline]
    pub fn recycle(&self, t: T) {
        self.objects.lock().push(t)
    }
}

pub struct Reusable<'a, T> {
    pool: &'a Pool<T>,
    obj: ManuallyDrop<T>,
}

impl<'a, T> Reusable<'a, T> {
    #[inline]
    pub fn new(pool: &'a Pool<T>, t: T) -> Self {
        Self {
            pool,
            obj: ManuallyDrop::new(t),
        }
    }

    #[inline]
    pub fn into_inner(mut self) -> T {
        let ret = unsafe { self.take() };
        forget(self);
        ret
    }

    unsafe fn take(&mut self) -> T {
        ManuallyDrop::take(&mut self.obj)
    }
}

impl<'a, T> Deref for Reusable<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.obj
    }
}

impl<'a, T> DerefMut for Reusable<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.obj
    }
}

impl<'a, T> Drop for Reusable<'a, T> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.pool.recycle(self.take()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulled_objects_are_reset_and_recycled() {
        let pool: Pool<Vec<u32>> = Pool::new(Vec::new, Vec::clear);
        {
            let mut buf = pool.pull();
            buf.push(1);
            buf.push(2);
        }
        assert_eq!(pool.len(), 1);
        let buf = pool.pull();
        assert!(buf.is_empty());
        assert_eq!(pool.len(), 0);
    }
}
