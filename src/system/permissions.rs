use std::sync::
{
    Arc,
    Mutex
};

#[derive(Debug, Clone)]
pub struct Permissions(Arc<Mutex<u32>>);

impl Permissions
{
    fn new(mode: u32) -> Self
    {
        Permissions(Arc::new(Mutex::new(mode)))
    }

    pub fn get(&self) -> u32
    {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, mode: u32)
    {
        *self.0.lock().unwrap() = mode;
    }

    pub fn can_read(&self) -> bool
    {
        (*self.0.lock().unwrap() & 0o444) != 0
    }

    pub fn can_write(&self) -> bool
    {
        (*self.0.lock().unwrap() & 0o222) != 0
    }

    pub fn can_execute(&self) -> bool
    {
        (*self.0.lock().unwrap() & 0o111) != 0
    }

    pub fn make_read_only(&self)
    {
        let mut mode = self.0.lock().unwrap();
        *mode &= !0o222;
    }
}

#[derive(Debug)]
pub struct Dir {
    pub mode: Permissions,
}

impl Default for Dir
{
    fn default() -> Self
    {
        Dir
        {
            mode: Permissions::new(0o644)
        }
    }
}
