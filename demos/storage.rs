use std::{cell::RefCell, env, rc::Rc};

use segalloc::{ArenaAllocator, StorageManager};
use tracing_subscriber::EnvFilter;

const DEFAULT_ARENA_SIZE: usize = 100_000;
const N: usize = 5;

/// Hands out sequential identifiers.
#[derive(Default)]
struct IdGenerator {
  next: usize,
}

impl IdGenerator {
  fn next_id(&mut self) -> usize {
    let id = self.next;
    self.next += 1;
    id
  }
}

struct Widget {
  id: usize,
}

impl Widget {
  fn new(ids: &mut IdGenerator) -> Self {
    let id = ids.next_id();
    println!("Widget with id {id} created.");
    Self { id }
  }
}

impl Drop for Widget {
  fn drop(&mut self) {
    println!("Widget with id {} destroyed.", self.id);
  }
}

/// Reads the arena size from `SEGALLOC_ARENA_SIZE`, falling back to the
/// default when unset or unparsable.
fn arena_size() -> usize {
  env::var("SEGALLOC_ARENA_SIZE")
    .ok()
    .and_then(|value| value.parse().ok())
    .unwrap_or(DEFAULT_ARENA_SIZE)
}

fn print_table(manager: &StorageManager) {
  for segment in manager.segments() {
    println!("    {segment}");
  }
}

fn main() -> segalloc::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let mut ids = IdGenerator::default();
  let manager = Rc::new(RefCell::new(StorageManager::with_name("demo", arena_size())?));

  // --------------------------------------------------------------------
  // 1) Allocate room for N widgets, construct them in place, destroy
  //    them and give the storage back.
  // --------------------------------------------------------------------
  {
    let allocator = ArenaAllocator::<Widget>::new(Rc::clone(&manager));

    let widgets = allocator.allocate(N)?;
    println!("\n[1] Allocated {N} widgets");
    print_table(&manager.borrow());

    for i in 0..N {
      unsafe { allocator.construct(widgets.add(i), Widget::new(&mut ids)) };
    }

    for i in 0..N {
      unsafe { allocator.destroy(widgets.add(i)) };
    }

    allocator.deallocate(widgets, N)?;
    println!("[1] Deallocated, table is back to one segment:");
    print_table(&manager.borrow());
  }

  // --------------------------------------------------------------------
  // 2) Fragment the arena and watch freed neighbours coalesce.
  // --------------------------------------------------------------------
  {
    let mut manager = manager.borrow_mut();

    let a = manager.allocate(100)?;
    let b = manager.allocate(100)?;
    let c = manager.allocate(100)?;
    println!("\n[2] Three 100 byte allocations:");
    print_table(&manager);

    manager.free(a)?;
    manager.free(c)?;
    println!("[2] Freed the outer two:");
    print_table(&manager);

    manager.free(b)?;
    println!("[2] Freed the middle one, everything merged:");
    print_table(&manager);
  }

  // --------------------------------------------------------------------
  // 3) Error paths are ordinary values.
  // --------------------------------------------------------------------
  {
    let mut manager = manager.borrow_mut();
    let capacity = manager.capacity();

    match manager.allocate(capacity + 1) {
      Ok(_) => println!("\n[3] Unexpectedly allocated more than the arena"),
      Err(error) => println!("\n[3] {error}"),
    }

    let address = manager.allocate(16)?;
    manager.free(address)?;
    if let Err(error) = manager.free(address) {
      println!("[3] Second free: {error}");
    }

    println!("[3] {:?}", manager.usage());
  }

  Ok(())
}
