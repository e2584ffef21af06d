//! 有界字节 FIFO
//!
//! 设计目标：
//! - 零分配：所有内存在创建时预分配
//! - 永不阻塞：写满则截断（drop newest），读空则返回 0
//! - 可选 mlock 防止 page fault
//!
//! 本身不做同步，由 AudioChannel 的锁保护。
//! 实时回调线程和总线轮询线程只在这把锁上交汇。

/// 有界字节环形队列
pub struct ByteFifo {
    buffer: Box<[u8]>,
    head: usize,
    len: usize,
    memory_locked: bool,
}

impl ByteFifo {
    /// 创建指定容量（字节）的 FIFO
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "fifo capacity must be non-zero");
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            memory_locked: false,
        }
    }

    /// 锁定缓冲区内存，防止被换页
    ///
    /// 返回是否成功锁定
    pub fn lock_memory(&mut self) -> bool {
        if self.memory_locked {
            return true;
        }

        let ptr = self.buffer.as_ptr() as *const libc::c_void;
        let len = self.buffer.len();

        let result = unsafe { libc::mlock(ptr, len) };

        if result == 0 {
            self.memory_locked = true;
            log::debug!("Fifo memory locked: {} bytes", len);
            true
        } else {
            log::warn!(
                "Failed to lock fifo memory: {}",
                std::io::Error::last_os_error()
            );
            false
        }
    }

    fn unlock_memory(&mut self) {
        if !self.memory_locked {
            return;
        }

        let ptr = self.buffer.as_ptr() as *const libc::c_void;
        unsafe {
            libc::munlock(ptr, self.buffer.len());
        }
        self.memory_locked = false;
    }

    /// 检查内存是否已锁定
    pub fn is_memory_locked(&self) -> bool {
        self.memory_locked
    }

    /// 写入字节
    ///
    /// 返回实际写入的字节数，超出剩余空间的部分被丢弃
    pub fn push(&mut self, data: &[u8]) -> usize {
        let to_write = data.len().min(self.free_space());
        let capacity = self.capacity();

        let tail = (self.head + self.len) % capacity;
        let first = to_write.min(capacity - tail);
        self.buffer[tail..tail + first].copy_from_slice(&data[..first]);
        // 环绕部分
        let rest = to_write - first;
        self.buffer[..rest].copy_from_slice(&data[first..to_write]);

        self.len += to_write;
        to_write
    }

    /// 读取字节
    ///
    /// 返回实际读取的字节数，可能少于 output.len()，也可能为 0
    pub fn pop(&mut self, output: &mut [u8]) -> usize {
        let to_read = output.len().min(self.len);
        let capacity = self.capacity();

        let first = to_read.min(capacity - self.head);
        output[..first].copy_from_slice(&self.buffer[self.head..self.head + first]);
        let rest = to_read - first;
        output[first..to_read].copy_from_slice(&self.buffer[..rest]);

        self.head = (self.head + to_read) % capacity;
        self.len -= to_read;
        if self.len == 0 {
            self.head = 0;
        }
        to_read
    }

    /// 当前可读字节数
    #[inline]
    pub fn available(&self) -> usize {
        self.len
    }

    /// 当前可写空间
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.len
    }

    /// 容量
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// 清空缓冲区
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl Drop for ByteFifo {
    fn drop(&mut self) {
        self.unlock_memory();
    }
}
