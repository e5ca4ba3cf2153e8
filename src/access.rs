//! `AccessGranted`: UID/GID permission checks (spec §4.10).

use bitflags::bitflags;

use crate::layout::{Inode, Mode};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const R = 0b001;
        const W = 0b010;
        const X = 0b100;
    }
}

/// The calling context's identity, threaded explicitly through every
/// public `Engine` call rather than kept as ambient module state.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
}

impl Caller {
    pub const ROOT: Caller = Caller { uid: 0, gid: 0 };

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

pub fn access_granted(caller: Caller, inode: &Inode, requested: Access) -> bool {
    if caller.is_root() {
        let exec_bit = inode.mode & (Mode::U_EXEC | Mode::G_EXEC | Mode::O_EXEC);
        let x_ok = !requested.contains(Access::X) || !exec_bit.is_empty();
        return x_ok;
    }

    let triple = if caller.uid == inode.owner {
        (Mode::U_READ, Mode::U_WRITE, Mode::U_EXEC)
    } else if caller.gid == inode.group {
        (Mode::G_READ, Mode::G_WRITE, Mode::G_EXEC)
    } else {
        (Mode::O_READ, Mode::O_WRITE, Mode::O_EXEC)
    };

    let r_ok = !requested.contains(Access::R) || inode.mode.contains(triple.0);
    let w_ok = !requested.contains(Access::W) || inode.mode.contains(triple.1);
    let x_ok = !requested.contains(Access::X) || inode.mode.contains(triple.2);
    r_ok && w_ok && x_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FileType;

    fn inode_with_mode(owner: u32, group: u32, perm: Mode, ty: FileType) -> Inode {
        let mut inode = Inode::free();
        inode.mode = perm | ty.mode_bit();
        inode.owner = owner;
        inode.group = group;
        inode
    }

    #[test]
    fn root_bypasses_rw_but_needs_exec_bit() {
        let inode = inode_with_mode(5, 5, Mode::U_READ, FileType::File);
        let root = Caller::ROOT;
        assert!(access_granted(root, &inode, Access::R | Access::W));
        assert!(!access_granted(root, &inode, Access::X));
    }

    #[test]
    fn owner_group_other_triples() {
        let inode = inode_with_mode(1, 2, Mode::U_READ | Mode::G_WRITE | Mode::O_EXEC, FileType::File);
        assert!(access_granted(Caller { uid: 1, gid: 9 }, &inode, Access::R));
        assert!(!access_granted(Caller { uid: 1, gid: 9 }, &inode, Access::W));
        assert!(access_granted(Caller { uid: 9, gid: 2 }, &inode, Access::W));
        assert!(access_granted(Caller { uid: 9, gid: 9 }, &inode, Access::X));
    }
}
