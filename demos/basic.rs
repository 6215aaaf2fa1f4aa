//! Walks through a few allocations and prints the heap after each step.

use tagalloc::{Heap, HeapSource, OsHeap};

fn print_heap<S: HeapSource>(label: &str, heap: &Heap<S>) {
    println!("\n[{label}] heap {:?}..{:?} ({} bytes)", heap.heap_lo(), heap.heap_hi(), heap.heap_size());

    for block in heap.blocks() {
        println!(
            "  {:>6} {:>6} bytes  {}",
            block.payload.offset(),
            block.size,
            if block.allocated { "allocated" } else { "free" }
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut heap = Heap::new(OsHeap::reserve(1 << 20)?)?;
    print_heap("init", &heap);

    let a = heap.allocate(100)?;
    let b = heap.allocate(3800)?;
    print_heap("allocate 100 and 3800", &heap);

    heap.release(a);
    print_heap("release the first block", &heap);

    let c = heap.allocate(90)?;
    println!("\nallocate(90) reused the first block: {}", c == a);

    let d = heap.resize(c, 6000)?;
    print_heap("resize it to 6000 (grows the heap)", &heap);

    heap.release(b);
    heap.release(d);
    print_heap("release everything", &heap);

    println!("\ninvariants hold: {}", heap.check_invariants("demo"));
    Ok(())
}
