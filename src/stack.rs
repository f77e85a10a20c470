//! Worker threads sized for the recursion limit.
//!
//! Folding and evaluation use native recursion for every nested scope. The scope guard
//! only turns runaway recursion into an error if the stack can hold `limit` scopes, so
//! both passes run on a thread whose stack is reserved from that limit rather than on
//! whatever thread the caller happens to be on.

use std::{io, panic, thread};

/// Native stack reserved for each nested scope. Generous enough for unoptimized builds.
const STACK_PER_SCOPE: usize = 64 * 1024;
const BASE_STACK: usize = 4 * 1024 * 1024;
const MAX_STACK: usize = 1024 * 1024 * 1024;

pub fn stack_size(limit: usize) -> usize {
    limit
        .saturating_mul(STACK_PER_SCOPE)
        .saturating_add(BASE_STACK)
        .min(MAX_STACK)
}

/// Runs `task` to completion on a thread with room for `limit` nested scopes.
///
/// Fails only if the thread could not be started; a panic in `task` resumes on the
/// calling thread.
pub fn with_room_for<R, F>(limit: usize, task: F) -> io::Result<R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("graft-worker".to_string())
            .stack_size(stack_size(limit))
            .spawn_scoped(scope, task)?;
        match handle.join() {
            Ok(result) => Ok(result),
            Err(payload) => panic::resume_unwind(payload),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn depth(n: usize) -> usize {
        let frame = std::hint::black_box([0u8; 512]);
        if n == 0 {
            0
        } else {
            depth(n - 1) + 1 + usize::from(frame[n % 512])
        }
    }

    #[test]
    fn stack_grows_with_the_limit() {
        assert!(stack_size(380) > stack_size(10));
        assert_eq!(stack_size(usize::MAX), MAX_STACK);
    }

    #[test]
    fn deep_recursion_fits_on_the_worker() {
        // Roughly 10 MiB of frames: more than a default test thread holds.
        let result = with_room_for(380, || depth(20_000)).unwrap();
        assert_eq!(result, 20_000);
    }

    #[test]
    fn borrowed_state_is_handed_back() {
        let mut items = vec![1, 2];
        let pushed = with_room_for(1, || {
            items.push(3);
            items.len()
        })
        .unwrap();
        assert_eq!(pushed, 3);
        assert_eq!(items, vec![1, 2, 3]);
    }
}
