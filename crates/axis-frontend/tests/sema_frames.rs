use axis_frontend::check_source;

#[test]
fn frame_sizes_are_multiples_of_sixteen() {
    let sources = [
        "func main() -> i32:\n    give 0\n",
        "func main() -> i32:\n    x: i32 = 1\n    give x\n",
        "func main() -> i32:\n    a: i8 = 1\n    b: i64 = 2\n    c: i16 = 3\n    give 0\n",
        "func f(a: i32, b: i64, c: i8) -> i32:\n    d: i32 = 1\n    give d\nfunc main() -> i32:\n    give f(1, 2, 3)\n",
    ];
    for src in sources {
        let checked = check_source(src).expect("check ok");
        for f in &checked.funcs {
            assert_eq!(f.frame_size % 16, 0, "frame of {} not aligned: {}", f.name, f.frame_size);
        }
    }
}

#[test]
fn offsets_are_negative_aligned_and_in_declaration_order() {
    let src = "func main() -> i32:\n    a: i8 = 1\n    b: i32 = 2\n    c: i8 = 3\n    d: i64 = 4\n    give 0\n";
    let checked = check_source(src).expect("check ok");
    let f = &checked.funcs[0];

    // a at -1; b aligned to 4 at -8; c next byte at -9; d aligned to 8 at -24.
    let offsets: Vec<i32> = collect_assign_offsets(&f.body);
    assert_eq!(offsets, vec![-1, -8, -9, -24]);
    assert_eq!(f.frame_size, 32);
}

#[test]
fn params_take_the_first_slots() {
    let src = "func f(a: i32, b: i64) -> i32:\n    c: i32 = 1\n    give c\nfunc main() -> i32:\n    give f(1, 2)\n";
    let checked = check_source(src).expect("check ok");
    let f = checked.funcs.iter().find(|f| f.name == "f").unwrap();
    assert_eq!(f.params[0].offset, -4);
    assert_eq!(f.params[1].offset, -16);
    let offsets = collect_assign_offsets(&f.body);
    assert_eq!(offsets, vec![-20]);
}

#[test]
fn string_literals_are_deduplicated() {
    let src = "func main() -> i32:\n    a: str = \"hello\"\n    b: str = \"hello\"\n    c: str = \"other\"\n    give 0\n";
    let checked = check_source(src).expect("check ok");
    assert_eq!(checked.strings.len(), 2);
    assert_eq!(checked.strings[0], b"hello".to_vec());
    assert_eq!(checked.strings[1], b"other".to_vec());
}

fn collect_assign_offsets(body: &[axis_frontend::sema::TStmt]) -> Vec<i32> {
    use axis_frontend::sema::TStmt;
    let mut out = Vec::new();
    for s in body {
        if let TStmt::Assign { offset, .. } = s {
            out.push(*offset);
        }
    }
    out
}
