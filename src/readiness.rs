use std::{fmt, ops};

/// A set of readiness kinds.
///
/// `Readiness` is used both for requesting events on a file-descriptor
/// watcher (see [`FdWatcher::set_events`]) and for delivering the ready
/// kinds to the watcher's handler. Only [`READABLE`] and [`WRITABLE`] may be
/// requested; [`ERROR`] and [`HUP`] are delivered whenever the OS reports
/// them, regardless of the requested set.
///
/// [`FdWatcher::set_events`]: crate::FdWatcher::set_events
/// [`READABLE`]: Readiness::READABLE
/// [`WRITABLE`]: Readiness::WRITABLE
/// [`ERROR`]: Readiness::ERROR
/// [`HUP`]: Readiness::HUP
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct Readiness(u8);

const READABLE: u8 = 0b0001;
const WRITABLE: u8 = 0b0010;
const ERROR: u8 = 0b0100;
const HUP: u8 = 0b1000;

impl Readiness {
    /// The empty set; a watcher with no requested events stays registered
    /// but silent (apart from error conditions).
    pub const EMPTY: Readiness = Readiness(0);

    /// Readable readiness.
    pub const READABLE: Readiness = Readiness(READABLE);

    /// Writable readiness.
    pub const WRITABLE: Readiness = Readiness(WRITABLE);

    /// Error readiness. Delivery-only: the next I/O operation on the
    /// descriptor will surface the error.
    pub const ERROR: Readiness = Readiness(ERROR);

    /// Hang-up readiness. Delivery-only.
    pub const HUP: Readiness = Readiness(HUP);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        (self.0 & READABLE) != 0
    }

    pub const fn is_writable(self) -> bool {
        (self.0 & WRITABLE) != 0
    }

    pub const fn is_error(self) -> bool {
        (self.0 & ERROR) != 0
    }

    pub const fn is_hup(self) -> bool {
        (self.0 & HUP) != 0
    }

    /// Returns true if `self` contains every kind in `other`.
    pub const fn contains(self, other: Readiness) -> bool {
        (self.0 & other.0) == other.0
    }

    /// The intersection of the two sets.
    pub const fn intersection(self, other: Readiness) -> Readiness {
        Readiness(self.0 & other.0)
    }

    /// `self` without the kinds in `other`.
    pub const fn remove(self, other: Readiness) -> Readiness {
        Readiness(self.0 & !other.0)
    }
}

impl ops::BitOr for Readiness {
    type Output = Readiness;

    #[inline]
    fn bitor(self, other: Readiness) -> Readiness {
        Readiness(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Readiness {
    #[inline]
    fn bitor_assign(&mut self, other: Readiness) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Readiness {
    type Output = Readiness;

    #[inline]
    fn bitand(self, other: Readiness) -> Readiness {
        Readiness(self.0 & other.0)
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(fmt, "(empty)");
        }
        let mut one = false;
        let mut put = |fmt: &mut fmt::Formatter<'_>, name| -> fmt::Result {
            if one {
                write!(fmt, " | ")?;
            }
            one = true;
            write!(fmt, "{}", name)
        };
        if self.is_readable() {
            put(fmt, "READABLE")?;
        }
        if self.is_writable() {
            put(fmt, "WRITABLE")?;
        }
        if self.is_error() {
            put(fmt, "ERROR")?;
        }
        if self.is_hup() {
            put(fmt, "HUP")?;
        }
        Ok(())
    }
}
