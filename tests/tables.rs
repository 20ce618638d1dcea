mod common;

use common::{eval, machine, run, unhandled_type};

#[test]
fn put_inserts_only_when_absent() {
    let mut m = machine();
    eval(&mut m, "(define t (make-hash-table))").unwrap();
    assert_eq!(eval(&mut m, "(hash-table-put! t 'a 1)").unwrap(), "#t");
    assert_eq!(eval(&mut m, "(hash-table-put! t 'a 2)").unwrap(), "#f");
    assert_eq!(eval(&mut m, "(hash-table-ref t 'a)").unwrap(), "1");
    assert_eq!(eval(&mut m, "(hash-table-set! t 'a 3)").unwrap(), "3");
    assert_eq!(eval(&mut m, "(hash-table-ref t 'a)").unwrap(), "3");
}

#[test]
fn missing_keys_and_removal() {
    let mut m = machine();
    eval(&mut m, "(define t (make-hash-table 'eqv))").unwrap();
    assert_eq!(eval(&mut m, "(hash-table-ref t 1)").unwrap(), "()");
    assert_eq!(eval(&mut m, "(hash-table-ref t 1 'none)").unwrap(), "none");
    // A stored nil is still a present key.
    eval(&mut m, "(hash-table-set! t 1 '())").unwrap();
    assert_eq!(eval(&mut m, "(hash-table-ref t 1 'none)").unwrap(), "()");
    assert_eq!(eval(&mut m, "(hash-table-count t)").unwrap(), "1");
    assert_eq!(eval(&mut m, "(hash-table-unset! t 1)").unwrap(), "#t");
    assert_eq!(eval(&mut m, "(hash-table-unset! t 1)").unwrap(), "#f");
    assert_eq!(eval(&mut m, "(hash-table-count t)").unwrap(), "0");
}

#[test]
fn equality_mode_decides_key_matching() {
    assert_eq!(
        run("(define t (make-hash-table 'equal))
             (hash-table-set! t (list 1 2) 'found)
             (hash-table-set! t \"key\" 'text)
             (list (hash-table-ref t (list 1 2) 'none) (hash-table-ref t \"key\" 'none))"),
        "(found text)"
    );
    assert_eq!(
        run("(define t (make-hash-table 'eq))
             (define k (list 1 2))
             (hash-table-set! t k 'found)
             (list (hash-table-ref t k 'none) (hash-table-ref t (list 1 2) 'none))"),
        "(found none)"
    );
}

#[test]
fn tables_grow_past_the_small_representation() {
    assert_eq!(
        run("(define t (make-hash-table))
             (do ((i 0 (+ i 1))) ((= i 100)) (hash-table-set! t i (* i i)))
             (list (hash-table-count t)
                   (hash-table-ref t 0)
                   (hash-table-ref t 7)
                   (hash-table-ref t 99)
                   (length (hash-table->alist t)))"),
        "(100 0 49 9801 100)"
    );
}

#[test]
fn alist_entries_are_key_value_pairs() {
    assert_eq!(
        run("(define t (make-hash-table 'eq))
             (hash-table-set! t 'only 1)
             (hash-table->alist t)"),
        "((only . 1))"
    );
    assert_eq!(run("(hash-table? (make-hash-table))"), "#t");
    assert_eq!(run("(hash-table? '())"), "#f");
}

#[test]
fn bad_arguments_are_conditions() {
    let mut m = machine();
    assert_eq!(unhandled_type(&mut m, "(hash-table-ref '() 1)"), "type-mismatch");
    assert_eq!(unhandled_type(&mut m, "(make-hash-table 'fuzzy)"), "error");
}

#[test]
fn long_lists_are_equal_and_usable_as_keys() {
    let mut m = machine();
    eval(
        &mut m,
        "(define (build n) (let loop ((i n) (acc '())) (if (= i 0) acc (loop (- i 1) (cons i acc)))))
         (define a (build 20000))
         (define b (build 20000))",
    )
    .unwrap();
    assert_eq!(eval(&mut m, "(equal? a b)").unwrap(), "#t");
    assert_eq!(eval(&mut m, "(equal? a (cons 0 (cdr b)))").unwrap(), "#f");
    assert_eq!(eval(&mut m, "(equal? a (build 20001))").unwrap(), "#f");
    eval(&mut m, "(define t (make-hash-table 'equal)) (hash-table-set! t a 'found)").unwrap();
    assert_eq!(eval(&mut m, "(hash-table-ref t b)").unwrap(), "found");
    assert_eq!(eval(&mut m, "(length (member b (list 1 a)))").unwrap(), "1");
}
