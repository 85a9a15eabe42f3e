//! AF_PACKET socket bound to the PPPoE Discovery EtherType

use super::Transport;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::ffi::CString;
use std::os::unix::io::RawFd;
use tokio::io::unix::AsyncFd;

/// AF_PACKET socket wrapper for the discovery phase
pub struct AfPacketSocket {
    async_fd: AsyncFd<RawFd>,
    mac: MacAddr,
}

impl AfPacketSocket {
    /// Open an AF_PACKET socket on `ifname`, bound to EtherType 0x8863
    /// so the kernel only delivers discovery frames.
    pub fn bind(ifname: &str) -> Result<Self> {
        let proto = (libc::ETH_P_PPP_DISC as u16).to_be();
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, proto as i32) };
        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let ifindex = match Self::get_ifindex(fd, ifname) {
            Ok(i) => i,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: proto,
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };

        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if ret < 0 {
            unsafe { libc::close(fd) };
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let mac = match Self::get_hwaddr(fd, ifname) {
            Ok(mac) => mac,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        // Non-blocking for AsyncFd
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

        let async_fd = AsyncFd::new(fd).map_err(Error::Io)?;

        Ok(Self { async_fd, mac })
    }

    /// Hardware address of the bound interface
    pub fn mac_address(&self) -> MacAddr {
        self.mac
    }

    fn ifreq_for(ifname: &str) -> Result<libc::ifreq> {
        let ifname_c = CString::new(ifname).map_err(|_| Error::InterfaceNotFound {
            name: ifname.to_string(),
        })?;
        if ifname_c.as_bytes_with_nul().len() > libc::IFNAMSIZ {
            return Err(Error::InterfaceNotFound {
                name: ifname.to_string(),
            });
        }

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        let name_bytes = ifname_c.as_bytes_with_nul();
        ifr.ifr_name[..name_bytes.len()].copy_from_slice(unsafe {
            std::slice::from_raw_parts(name_bytes.as_ptr() as *const libc::c_char, name_bytes.len())
        });
        Ok(ifr)
    }

    fn get_ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
        let mut ifr = Self::ifreq_for(ifname)?;
        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(Error::InterfaceNotFound {
                name: ifname.to_string(),
            });
        }
        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    fn get_hwaddr(fd: RawFd, ifname: &str) -> Result<MacAddr> {
        let mut ifr = Self::ifreq_for(ifname)?;
        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut ifr) };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let sa_data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(sa_data.iter()) {
            *dst = *src as u8;
        }
        Ok(MacAddr(mac))
    }

    async fn recv_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self.async_fd.readable_mut().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut _, buf.len(), 0) };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    async fn send_inner(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.async_fd.writable_mut().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let n = unsafe { libc::send(fd, buf.as_ptr() as *const _, buf.len(), 0) };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        unsafe { libc::close(*self.async_fd.get_ref()) };
    }
}

impl Transport for AfPacketSocket {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.recv_inner(buf).await
    }

    async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        self.send_inner(buf).await
    }
}
