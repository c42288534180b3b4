/*!
 * Epoll Emulation
 *
 * A small pool of epoll instances, each backed by one native wait-set and
 * a linear watch table that remembers the caller's `epoll_data` per fd.
 */

use linux_raw_sys::general::{
    EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL,
    EPOLL_CTL_MOD,
};
use std::mem::size_of;
use std::time::Duration;
use tracing::{debug, trace};

use super::descriptors::Descriptor;
use super::Dispatcher;
use crate::abi::errno::Errno;
use crate::abi::layout::EpollEvent;
use crate::abi::user;
use crate::core::errors::{SyscallError, SyscallResult};
use crate::core::types::Fd;
use crate::native::{Interest, WaitSet};

/// Native interest for a set of POSIX epoll events
///
/// Hang-up conditions count as input: a closed peer shows up as a
/// readable socket returning end of stream.
pub fn interest_from_events(events: u32) -> Interest {
    let mut interest = Interest::empty();
    if events & (EPOLLIN | EPOLLRDHUP | EPOLLHUP) as u32 != 0 {
        interest |= Interest::INPUT;
    }
    if events & EPOLLOUT as u32 != 0 {
        interest |= Interest::OUTPUT;
    }
    interest
}

pub fn events_from_interest(interest: Interest) -> u32 {
    let mut events = 0;
    if interest.contains(Interest::INPUT) {
        events |= EPOLLIN as u32;
    }
    if interest.contains(Interest::OUTPUT) {
        events |= EPOLLOUT as u32;
    }
    events
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watch {
    pub fd: Fd,
    pub data: u64,
}

/// One epoll instance
pub struct EpollInstance {
    waiter: Box<dyn WaitSet>,
    watches: Vec<Option<Watch>>,
}

impl EpollInstance {
    pub fn new(waiter: Box<dyn WaitSet>, max_watches: usize) -> Self {
        Self {
            waiter,
            watches: vec![None; max_watches],
        }
    }

    fn position(&self, fd: Fd) -> Option<usize> {
        self.watches
            .iter()
            .position(|w| matches!(w, Some(w) if w.fd == fd))
    }

    /// Watched descriptors in table order
    pub fn watches(&self) -> impl Iterator<Item = &Watch> {
        self.watches.iter().flatten()
    }

    pub fn add(&mut self, fd: Fd, interest: Interest, data: u64) -> SyscallResult<()> {
        if self.position(fd).is_some() {
            return Err(Errno::EEXIST.into());
        }
        let slot = self
            .watches
            .iter_mut()
            .find(|w| w.is_none())
            .ok_or(SyscallError::slots_exhausted("epoll watch"))?;
        *slot = Some(Watch { fd, data });
        self.waiter.add(fd, interest);
        Ok(())
    }

    pub fn modify(&mut self, fd: Fd, interest: Interest, data: u64) -> SyscallResult<()> {
        let idx = self.position(fd).ok_or(Errno::ENOENT)?;
        self.watches[idx] = Some(Watch { fd, data });
        self.waiter.set(fd, interest);
        Ok(())
    }

    pub fn delete(&mut self, fd: Fd) -> SyscallResult<()> {
        let idx = self.position(fd).ok_or(Errno::ENOENT)?;
        self.watches[idx] = None;
        self.waiter.remove(fd);
        Ok(())
    }

    /// Wait according to the POSIX timeout and fill `out` with ready events
    ///
    /// Ready descriptors beyond `out.len()` are dropped.
    pub fn wait(&mut self, out: &mut [EpollEvent], timeout_ms: i32) -> usize {
        match timeout_ms {
            t if t < 0 => self.waiter.wait(),
            // one readiness check without blocking
            0 => self.waiter.wait_for(Duration::from_nanos(1)),
            t => self.waiter.wait_for(Duration::from_millis(t as u64)),
        }

        let watches = &self.watches;
        let mut count = 0;
        self.waiter.for_each_ready(&mut |fd, interest| {
            if count == out.len() {
                return;
            }
            let data = watches
                .iter()
                .flatten()
                .find(|w| w.fd == fd)
                .map_or(0, |w| w.data);
            out[count] = EpollEvent {
                events: events_from_interest(interest),
                data,
            };
            count += 1;
        });
        count
    }
}

/// Largest `maxevents` Linux accepts
const MAX_EVENTS: usize = i32::MAX as usize / size_of::<EpollEvent>();

impl Dispatcher {
    fn epoll_instance(&mut self, epfd: Fd) -> SyscallResult<&mut EpollInstance> {
        match self.descriptor(epfd) {
            Ok(Descriptor::Epoll(slot)) => self
                .epolls
                .get_mut(slot)
                .ok_or(SyscallError::BadDescriptor(epfd)),
            Ok(_) => Err(SyscallError::InvalidArgument("not an epoll descriptor")),
            Err(err) => Err(err),
        }
    }

    pub fn epoll_create(&mut self, flags: u32) -> SyscallResult<Fd> {
        if flags & !(EPOLL_CLOEXEC as u32) != 0 {
            return Err(SyscallError::InvalidArgument("epoll_create1 flags"));
        }
        if self.epolls.len() == self.epolls.capacity() {
            return Err(SyscallError::slots_exhausted("epoll"));
        }

        let waiter = self.events.create_wait_set()?;
        let instance = EpollInstance::new(waiter, self.config.max_epoll_watches);
        let slot = self
            .epolls
            .insert(instance)
            .map_err(|_| SyscallError::slots_exhausted("epoll"))?;

        let epfd = self.layout.epoll_fd(slot);
        debug!(epfd, "epoll instance created");
        Ok(epfd)
    }

    pub fn epoll_ctl(
        &mut self,
        epfd: Fd,
        op: u32,
        fd: Fd,
        event: Option<EpollEvent>,
    ) -> SyscallResult<()> {
        if fd == epfd {
            return Err(SyscallError::InvalidArgument("epoll instance watching itself"));
        }
        self.epoll_instance(epfd)?;

        if op == EPOLL_CTL_DEL as u32 {
            return self.epoll_instance(epfd)?.delete(fd);
        }

        let event = event.ok_or(SyscallError::Fault)?;
        let events = event.events;
        let data = event.data;
        let interest = interest_from_events(events);
        trace!(epfd, op, fd, events, "epoll_ctl");

        match op {
            op if op == EPOLL_CTL_ADD as u32 => {
                self.descriptor(fd)?;
                self.epoll_instance(epfd)?.add(fd, interest, data)
            }
            op if op == EPOLL_CTL_MOD as u32 => self.epoll_instance(epfd)?.modify(fd, interest, data),
            _ => Err(SyscallError::InvalidArgument("epoll_ctl op")),
        }
    }

    /// Wait for readiness on `epfd`; see `EpollInstance::wait`
    pub fn epoll_wait(
        &mut self,
        epfd: Fd,
        events: &mut [EpollEvent],
        timeout_ms: i32,
    ) -> SyscallResult<usize> {
        if events.is_empty() {
            return Err(SyscallError::InvalidArgument("maxevents"));
        }
        Ok(self.epoll_instance(epfd)?.wait(events, timeout_ms))
    }

    /// `epoll_pwait` into the caller's event array
    ///
    /// # Safety
    /// `events` must be writable for `maxevents` entries.
    pub unsafe fn epoll_wait_into(
        &mut self,
        epfd: Fd,
        events: usize,
        maxevents: i32,
        timeout_ms: i32,
    ) -> SyscallResult<usize> {
        if maxevents <= 0 || maxevents as usize > MAX_EVENTS {
            return Err(SyscallError::InvalidArgument("maxevents"));
        }
        // no more events than watches can ever be ready
        let max = (maxevents as usize).min(self.config.max_epoll_watches.max(1));
        let mut ready = vec![EpollEvent::default(); max];
        let count = self.epoll_wait(epfd, &mut ready, timeout_ms)?;
        for (idx, event) in ready[..count].iter().enumerate() {
            user::write(events + idx * size_of::<EpollEvent>(), *event)?;
        }
        Ok(count)
    }

    pub(super) fn close_epoll(&mut self, slot: usize) {
        if self.epolls.remove(slot).is_some() {
            debug!(epfd = self.layout.epoll_fd(slot), "epoll instance closed");
        }
    }

    /// Drop watches on a descriptor that is being closed
    pub(super) fn forget_watches(&mut self, fd: Fd) {
        for (_, instance) in self.epolls.iter_mut() {
            let _ = instance.delete(fd);
        }
    }

    /// Watch table of the instance behind `epfd`
    pub fn epoll_watches(&self, epfd: Fd) -> SyscallResult<Vec<Watch>> {
        match self.descriptor(epfd)? {
            Descriptor::Epoll(slot) => Ok(self
                .epolls
                .get(slot)
                .map(|i| i.watches().copied().collect())
                .unwrap_or_default()),
            _ => Err(SyscallError::InvalidArgument("not an epoll descriptor")),
        }
    }
}
